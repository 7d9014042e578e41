//! PUBLISH: values of dirty elements, addressed by slot index

use super::{open_message, read_count, ProtocolError};
use crate::pubs::{wall_time, Pub, ValState, Value};
use crate::wire::{finish_message, start_message, MsgHeader, MsgType};
use bytes::Bytes;

/// slot + two timestamps + value length
const MIN_VALUE_RECORD: usize = 4 + 8 + 8 + 4;

/// An encoded PUBLISH and the slots it carries.
///
/// Encoding leaves the pub untouched. The carried elements stay DIRTY until
/// [`PublishBuffer::mark_sent`] is called once the message has been
/// delivered, so a failed send loses nothing.
#[derive(Debug, Clone)]
pub struct PublishBuffer {
    pub msg: Bytes,
    pub slots: Vec<usize>,
    pub send_time: f64,
}

impl PublishBuffer {
    /// DIRTY -> CLEAN for every carried slot. A slot repacked since encoding
    /// is still DIRTY and is cleared too, so only call this before the pub
    /// is packed again.
    pub fn mark_sent(&self, pub_: &mut Pub) {
        for &slot in &self.slots {
            pub_.mark_sent(slot, self.send_time);
        }
    }
}

/// Serialize every dirty element of `pub_`, stamped with the wall clock.
/// Returns `None` when nothing is dirty: no message should be sent.
pub fn publish_to_buffer(pub_: &Pub, msg_from: u64) -> Result<Option<PublishBuffer>, ProtocolError> {
    publish_to_buffer_at(pub_, msg_from, wall_time())
}

/// As [`publish_to_buffer`] with an explicit send time.
pub fn publish_to_buffer_at(
    pub_: &Pub,
    msg_from: u64,
    send_time: f64,
) -> Result<Option<PublishBuffer>, ProtocolError> {
    let slots: Vec<usize> = pub_
        .data()
        .iter()
        .enumerate()
        .filter(|(_, d)| d.is_dirty() && d.value().is_some())
        .map(|(slot, _)| slot)
        .collect();
    if slots.is_empty() {
        return Ok(None);
    }

    let mut w = start_message(MsgType::Publish, msg_from, pub_.guid);
    w.put_i32(slots.len() as i32);
    for &slot in &slots {
        let elem = &pub_.data()[slot];
        let Some(value) = elem.value() else {
            continue;
        };
        w.put_i32(slot as i32);
        w.put_f64(elem.time.pack);
        w.put_f64(send_time);
        value.encode(&mut w)?;
    }
    let msg = finish_message(w)?;
    Ok(Some(PublishBuffer {
        msg,
        slots,
        send_time,
    }))
}

/// Apply a PUBLISH to a pub that has already received the matching
/// ANNOUNCE. Returns the updated slots in message order.
///
/// Every record is validated before any slot is written.
pub fn publish_from_buffer(
    pub_: &mut Pub,
    buf: &[u8],
    recv_time: f64,
) -> Result<(MsgHeader, Vec<usize>), ProtocolError> {
    let (header, mut r) = open_message(buf, MsgType::Publish)?;
    let count = read_count(&mut r, MIN_VALUE_RECORD)?;

    let mut updates: Vec<(usize, f64, f64, Value)> = Vec::with_capacity(count);
    for _ in 0..count {
        let raw_slot = r.get_i32()?;
        let elem_count = pub_.elem_count();
        let slot = usize::try_from(raw_slot)
            .ok()
            .filter(|s| *s < elem_count)
            .ok_or(ProtocolError::SlotOutOfRange {
                slot: raw_slot,
                elem_count,
            })?;
        let time_pack = r.get_f64()?;
        let time_send = r.get_f64()?;
        let declared = pub_.data()[slot].val_type;
        let value = Value::decode(&mut r, declared)?;
        updates.push((slot, time_pack, time_send, value));
    }

    let mut slots = Vec::with_capacity(updates.len());
    for (slot, time_pack, time_send, value) in updates {
        if let Some(elem) = pub_.element_mut(slot) {
            elem.time.pack = time_pack;
            elem.time.send = time_send;
            elem.time.recv = recv_time;
            elem.set_value(value, ValState::Clean);
            slots.push(slot);
        }
    }
    Ok((header, slots))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guid::GuidAllocator;
    use crate::protocol::{announce_from_buffer, announce_to_buffer};
    use crate::wire::WireReader;

    fn record_count(buf: &[u8]) -> i32 {
        let mut r = WireReader::at(buf, crate::wire::HEADER_LEN);
        r.get_i32().unwrap()
    }

    /// Encode and treat the message as delivered.
    fn sent(src: &mut Pub) -> Option<Bytes> {
        let out = publish_to_buffer(src, 1).unwrap()?;
        out.mark_sent(src);
        Some(out.msg)
    }

    fn mirrored(src: &Pub) -> Pub {
        let mut dst = Pub::new(src.guid.to_string());
        announce_from_buffer(&mut dst, &announce_to_buffer(src, 1).unwrap()).unwrap();
        dst
    }

    #[test]
    fn test_scenario_single_int() {
        let ids = GuidAllocator::new(1, 100);
        let mut src = Pub::new("T");
        src.guid = 50;
        src.pack(&ids, "x", 42).unwrap();
        let mut dst = mirrored(&src);

        let buf = sent(&mut src).unwrap();
        publish_from_buffer(&mut dst, &buf, 10.0).unwrap();
        let elem = dst.element(0).unwrap();
        assert_eq!(elem.name, "x");
        assert_eq!(elem.value(), Some(&Value::Int(42)));
        assert_eq!(elem.state, ValState::Clean);
        assert_eq!(elem.time.recv, 10.0);

        src.pack(&ids, "x", 42).unwrap();
        assert!(sent(&mut src).is_none());

        src.pack(&ids, "x", 43).unwrap();
        let buf = sent(&mut src).unwrap();
        assert_eq!(record_count(&buf), 1);
        let (_, slots) = publish_from_buffer(&mut dst, &buf, 11.0).unwrap();
        assert_eq!(slots, vec![0]);
        assert_eq!(dst.get_value("x"), Some(&Value::Int(43)));
    }

    #[test]
    fn test_only_dirty_elements_are_sent() {
        let ids = GuidAllocator::new(1, 100);
        let mut src = Pub::new("T");
        for i in 0..6 {
            src.pack(&ids, &format!("e{}", i), i).unwrap();
        }
        sent(&mut src);

        src.pack(&ids, "e1", 100).unwrap();
        src.pack(&ids, "e4", 400).unwrap();
        let buf = sent(&mut src).unwrap();
        assert_eq!(record_count(&buf), 2);
        assert_eq!(src.dirty_count(), 0);
    }

    #[test]
    fn test_encoding_keeps_values_dirty_until_marked() {
        let ids = GuidAllocator::new(1, 100);
        let mut src = Pub::new("T");
        src.pack(&ids, "a", 1).unwrap();
        src.pack(&ids, "b", 2).unwrap();

        let out = publish_to_buffer_at(&src, 1, 5.0).unwrap().unwrap();
        assert_eq!(out.slots, vec![0, 1]);
        assert_eq!(src.dirty_count(), 2);
        // Encoding again yields the same records.
        let again = publish_to_buffer_at(&src, 1, 5.0).unwrap().unwrap();
        assert_eq!(again.msg, out.msg);

        out.mark_sent(&mut src);
        assert_eq!(src.dirty_count(), 0);
        assert_eq!(src.element(1).unwrap().time.send, 5.0);
    }

    #[test]
    fn test_empty_publish_is_none() {
        let p = Pub::new("T");
        assert!(publish_to_buffer(&p, 1).unwrap().is_none());
    }

    #[test]
    fn test_slot_beyond_receiver_count_rejected() {
        let ids = GuidAllocator::new(1, 100);
        let mut src = Pub::new("T");
        src.pack(&ids, "a", 1).unwrap();
        let mut dst = mirrored(&src);

        src.pack(&ids, "b", 2).unwrap();
        let buf = sent(&mut src).unwrap();
        let err = publish_from_buffer(&mut dst, &buf, 0.0).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::SlotOutOfRange {
                slot: 1,
                elem_count: 1
            }
        );
        // Nothing applied, including the valid record for slot 0.
        assert_eq!(dst.element(0).unwrap().state, ValState::Empty);
    }

    #[test]
    fn test_string_and_double_values() {
        let ids = GuidAllocator::new(1, 100);
        let mut src = Pub::new("T");
        src.pack(&ids, "label", "phase-two").unwrap();
        src.pack(&ids, "ratio", -0.0).unwrap();
        let mut dst = mirrored(&src);

        let buf = sent(&mut src).unwrap();
        publish_from_buffer(&mut dst, &buf, 0.0).unwrap();
        assert_eq!(dst.get_value("label"), Some(&Value::Str("phase-two".into())));
        assert_eq!(dst.element(0).unwrap().val_len(), "phase-two".len() + 1);
        match dst.get_value("ratio") {
            Some(Value::Double(v)) => assert!(v.is_sign_negative() && *v == 0.0),
            other => panic!("unexpected {:?}", other),
        }
    }
}
