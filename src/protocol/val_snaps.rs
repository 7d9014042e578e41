//! VAL_SNAPS: a batch of value snapshots for one pub

use super::{open_message, read_count, read_tag, ProtocolError};
use crate::pubs::{Pub, TimeStamps, ValType, Value, ValueSnapshot};
use crate::wire::{finish_message, start_message, MsgHeader, MsgType};
use bytes::Bytes;

/// index + guid + frame + three timestamps + type + value length
const MIN_SNAP_RECORD: usize = 4 + 8 + 8 + 3 * 8 + 4 + 4;

/// Serialize `snaps`; `None` when there is nothing to send.
pub fn val_snaps_to_buffer(
    pub_guid: u64,
    msg_from: u64,
    snaps: &[ValueSnapshot],
) -> Result<Option<Bytes>, ProtocolError> {
    if snaps.is_empty() {
        return Ok(None);
    }

    let mut w = start_message(MsgType::ValSnaps, msg_from, pub_guid);
    w.put_i32(snaps.len() as i32);
    for snap in snaps {
        w.put_i32(snap.elem_index);
        w.put_u64(snap.guid);
        w.put_i64(snap.frame);
        w.put_f64(snap.time.pack);
        w.put_f64(snap.time.send);
        w.put_f64(snap.time.recv);
        w.put_i32(snap.value.val_type().as_i32());
        snap.value.encode(&mut w)?;
    }
    Ok(Some(finish_message(w)?))
}

pub fn val_snaps_from_buffer(buf: &[u8]) -> Result<(MsgHeader, Vec<ValueSnapshot>), ProtocolError> {
    let (header, mut r) = open_message(buf, MsgType::ValSnaps)?;
    let count = read_count(&mut r, MIN_SNAP_RECORD)?;

    let mut snaps = Vec::with_capacity(count);
    for _ in 0..count {
        let elem_index = r.get_i32()?;
        let guid = r.get_u64()?;
        let frame = r.get_i64()?;
        let time = TimeStamps {
            pack: r.get_f64()?,
            send: r.get_f64()?,
            recv: r.get_f64()?,
        };
        let val_type = read_tag(&mut r, "value type", ValType::from_i32)?;
        let value = Value::decode(&mut r, val_type)?;
        snaps.push(ValueSnapshot {
            elem_index,
            guid,
            frame,
            time,
            value,
        });
    }
    Ok((header, snaps))
}

/// Check that each snapshot names an announced slot of the declared type.
pub fn check_against(pub_: &Pub, snaps: &[ValueSnapshot]) -> Result<(), ProtocolError> {
    for snap in snaps {
        let elem_count = pub_.elem_count();
        let slot = usize::try_from(snap.elem_index)
            .ok()
            .filter(|s| *s < elem_count)
            .ok_or(ProtocolError::SlotOutOfRange {
                slot: snap.elem_index,
                elem_count,
            })?;
        let declared = pub_.data()[slot].val_type;
        if declared != snap.value.val_type() {
            return Err(ProtocolError::TypeMismatch {
                slot,
                declared,
                got: snap.value.val_type(),
            });
        }
    }
    Ok(())
}
