//! ANNOUNCE: a pub's identity, meta fields and full element schema

use super::{bounded_count, open_message, read_tag, ProtocolError};
use crate::pubs::{Layer, Nature, Priority, Pub, PubMeta, Retain, Scope, ValType};
use crate::wire::{finish_message, start_message, MsgHeader, MsgType, WireWriter};
use bytes::Bytes;

/// guid + empty-name string + type
const MIN_ELEM_RECORD: usize = 8 + 5 + 4;

pub fn announce_to_buffer(pub_: &Pub, msg_from: u64) -> Result<Bytes, ProtocolError> {
    let mut w = start_message(MsgType::Announce, msg_from, pub_.guid);

    w.put_str(&pub_.node_id)?;
    w.put_i32(pub_.process_id);
    w.put_i32(pub_.thread_id);
    w.put_i32(pub_.comm_rank);
    w.put_str(&pub_.prog_name)?;
    w.put_str(&pub_.prog_ver)?;
    w.put_blob(&pub_.pragma)?;
    w.put_str(&pub_.title)?;
    w.put_i32(pub_.elem_count() as i32);
    encode_meta(&mut w, &pub_.meta);

    for elem in pub_.data() {
        w.put_u64(elem.guid);
        w.put_str(&elem.name)?;
        w.put_i32(elem.val_type.as_i32());
    }

    Ok(finish_message(w)?)
}

fn encode_meta(w: &mut WireWriter, meta: &PubMeta) {
    w.put_i32(meta.channel);
    w.put_i32(meta.layer.as_i32());
    w.put_i32(meta.nature.as_i32());
    w.put_i32(meta.pri_hint.as_i32());
    w.put_i32(meta.scope_hint.as_i32());
    w.put_i32(meta.retain_hint.as_i32());
}

/// Apply an ANNOUNCE to `pub_`.
///
/// The whole message is decoded before anything is modified, so a malformed
/// announce leaves the pub untouched. Slots beyond the announced count, and
/// announced slots whose GUID already matches, keep their current values.
pub fn announce_from_buffer(pub_: &mut Pub, buf: &[u8]) -> Result<MsgHeader, ProtocolError> {
    let (header, mut r) = open_message(buf, MsgType::Announce)?;

    let node_id = r.get_str()?;
    let process_id = r.get_i32()?;
    let thread_id = r.get_i32()?;
    let comm_rank = r.get_i32()?;
    let prog_name = r.get_str()?;
    let prog_ver = r.get_str()?;
    let pragma = r.get_blob()?;
    let title = r.get_str()?;
    let elem_count = r.get_i32()?;
    let meta = PubMeta {
        channel: r.get_i32()?,
        layer: read_tag(&mut r, "layer", Layer::from_i32)?,
        nature: read_tag(&mut r, "nature", Nature::from_i32)?,
        pri_hint: read_tag(&mut r, "priority", Priority::from_i32)?,
        scope_hint: read_tag(&mut r, "scope", Scope::from_i32)?,
        retain_hint: read_tag(&mut r, "retain", Retain::from_i32)?,
    };
    let count = bounded_count(elem_count, &r, MIN_ELEM_RECORD)?;

    let mut schema = Vec::with_capacity(count);
    for _ in 0..count {
        let guid = r.get_u64()?;
        let name = r.get_str()?;
        let val_type = read_tag(&mut r, "value type", ValType::from_i32)?;
        schema.push((guid, name, val_type));
    }

    pub_.guid = header.pub_guid;
    pub_.node_id = node_id;
    pub_.process_id = process_id;
    pub_.thread_id = thread_id;
    pub_.comm_rank = comm_rank;
    pub_.prog_name = prog_name;
    pub_.prog_ver = prog_ver;
    pub_.pragma = pragma;
    pub_.title = title;
    pub_.meta = meta;

    pub_.ensure_capacity(count);
    for (slot, (guid, name, val_type)) in schema.iter().enumerate() {
        pub_.apply_schema(slot, *guid, name, *val_type);
    }
    pub_.mark_announced();

    Ok(header)
}
