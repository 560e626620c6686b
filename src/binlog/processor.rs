use crate::binlog::event::{BinlogEvent, FLAG_REWRITE, TYPE_EMPTY};
use crate::binlog::BinlogError;

/// In-memory projection of the log: for every logical id, the latest
/// version of its record. Rewrites replace in place, tombstones flip the
/// low bit of the stored key, and compaction shifts live entries forward
/// once tombstones dominate.
#[derive(Debug, Default)]
pub struct BinlogEventsProcessor {
    /// Each key is `id * 2 + was_deleted`, kept sorted.
    ids: Vec<u64>,
    events: Vec<BinlogEvent>,
    total_events: usize,
    empty_events: usize,
    last_event_id: u64,
    offset: i64,
    total_raw_events_size: i64,
}

impl BinlogEventsProcessor {
    pub fn new() -> BinlogEventsProcessor {
        BinlogEventsProcessor::default()
    }

    pub fn add_event(&mut self, event: BinlogEvent) -> Result<(), BinlogError> {
        self.do_event(event)
    }

    fn do_event(&mut self, mut event: BinlogEvent) -> Result<(), BinlogError> {
        self.offset = event.offset;
        let fixed_id = event.id * 2;

        if event.flags & FLAG_REWRITE != 0
            && self.ids.last().map(|&last| last >= fixed_id).unwrap_or(false)
        {
            let pos = match self.ids.binary_search(&fixed_id) {
                Ok(pos) => pos,
                Err(_) => {
                    return Err(BinlogError::ProtocolViolation(format!(
                        "rewrite of unknown event {:?}",
                        event
                    )));
                }
            };
            self.total_raw_events_size -= self.events[pos].size() as i64;
            if event.type_ == TYPE_EMPTY {
                self.ids[pos] += 1;
                self.empty_events += 1;
                self.events[pos] = BinlogEvent::new(event.id, TYPE_EMPTY, 0, 0, b"");
            } else {
                event.clear_flag(FLAG_REWRITE);
                self.total_raw_events_size += event.size() as i64;
                self.events[pos] = event;
            }
        } else if event.type_ < 0 {
            // service records are consulted upstream, not stored
        } else {
            if self.ids.last().map(|&last| last >= fixed_id).unwrap_or(false) {
                return Err(BinlogError::ProtocolViolation(format!(
                    "event ids are not monotonic: {:?} after id {}",
                    event,
                    self.ids.last().map(|&id| id / 2).unwrap_or(0)
                )));
            }
            self.last_event_id = event.id;
            self.total_raw_events_size += event.size() as i64;
            self.total_events += 1;
            self.ids.push(fixed_id);
            self.events.push(event);
        }

        if self.total_events > 10 && self.empty_events * 4 > self.total_events * 3 {
            self.compactify();
        }
        Ok(())
    }

    /// Walk live records in id order.
    pub fn for_each(&self, mut callback: impl FnMut(&BinlogEvent)) {
        for (i, &id) in self.ids.iter().enumerate() {
            debug_assert!(i == 0 || self.ids[i - 1] < id);
            if id & 1 == 0 {
                callback(&self.events[i]);
            }
        }
    }

    pub fn last_event_id(&self) -> u64 {
        self.last_event_id
    }

    /// Byte offset in the log of the last accepted record's end.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn total_raw_events_size(&self) -> i64 {
        self.total_raw_events_size
    }

    pub fn total_events(&self) -> usize {
        self.total_events
    }

    fn compactify(&mut self) {
        debug_assert_eq!(self.ids.len(), self.events.len());
        let mut to = 0;
        for from in 0..self.ids.len() {
            if self.ids[from] & 1 == 0 {
                self.ids.swap(to, from);
                self.events.swap(to, from);
                to += 1;
            }
        }
        self.ids.truncate(to);
        self.events.truncate(to);
        self.total_events = to;
        self.empty_events = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn user_event(id: u64, data: &[u8]) -> BinlogEvent {
        BinlogEvent::new(id, 1, 0, 0, data)
    }

    fn rewrite_event(id: u64, data: &[u8]) -> BinlogEvent {
        BinlogEvent::new(id, 1, FLAG_REWRITE, 0, data)
    }

    fn erase_event(id: u64) -> BinlogEvent {
        BinlogEvent::new(id, TYPE_EMPTY, FLAG_REWRITE, 0, b"")
    }

    fn live_ids(p: &BinlogEventsProcessor) -> Vec<u64> {
        let mut out = Vec::new();
        p.for_each(|event| out.push(event.id));
        out
    }

    #[test]
    fn rewrite_replaces() {
        let mut p = BinlogEventsProcessor::new();
        p.add_event(user_event(1, b"aaaa")).unwrap();
        p.add_event(user_event(2, b"bbbb")).unwrap();
        p.add_event(rewrite_event(1, b"AAAA")).unwrap();

        let mut data = Vec::new();
        p.for_each(|event| data.push(event.data().to_vec()));
        assert_eq!(data, vec![b"AAAA".to_vec(), b"bbbb".to_vec()]);

        // the stored replacement no longer carries the rewrite bit
        let mut flags = Vec::new();
        p.for_each(|event| flags.push(event.flags));
        assert_eq!(flags, vec![0, 0]);
    }

    #[test]
    fn tombstone_erases() {
        let mut p = BinlogEventsProcessor::new();
        p.add_event(user_event(1, b"aaaa")).unwrap();
        p.add_event(user_event(2, b"bbbb")).unwrap();
        p.add_event(erase_event(1)).unwrap();

        assert_eq!(live_ids(&p), vec![2]);
        assert_eq!(p.last_event_id(), 2);
    }

    #[test]
    fn monotonicity_enforced() {
        let mut p = BinlogEventsProcessor::new();
        p.add_event(user_event(5, b"")).unwrap();
        assert!(matches!(
            p.add_event(user_event(5, b"")),
            Err(BinlogError::ProtocolViolation(_))
        ));
        assert!(matches!(
            p.add_event(user_event(3, b"")),
            Err(BinlogError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn rewrite_of_unknown_id_rejected() {
        let mut p = BinlogEventsProcessor::new();
        p.add_event(user_event(2, b"")).unwrap();
        p.add_event(user_event(4, b"")).unwrap();
        assert!(matches!(
            p.add_event(rewrite_event(3, b"")),
            Err(BinlogError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn compaction_keeps_live_entries() {
        let mut p = BinlogEventsProcessor::new();
        for id in 1..=20u64 {
            p.add_event(user_event(id, b"xxxx")).unwrap();
        }
        for id in 1..=16u64 {
            p.add_event(erase_event(id)).unwrap();
        }

        assert_eq!(live_ids(&p), vec![17, 18, 19, 20]);
        // compaction ran: tombstones were dropped from the arrays
        assert_eq!(p.total_events(), 4);
    }

    #[test]
    fn service_records_not_stored() {
        let mut p = BinlogEventsProcessor::new();
        p.add_event(BinlogEvent::new(
            0,
            crate::binlog::event::TYPE_AES_CTR_ENCRYPTION,
            0,
            0,
            b"",
        ))
        .unwrap();
        p.add_event(user_event(1, b"")).unwrap();
        assert_eq!(live_ids(&p), vec![1]);
    }
}
