//! Local-sync stage: apply queued data messages to the pub table
//!
//! A single thread consumes the local pipe, so messages from one client are
//! applied in the order they were received.

use super::context::{DaemonContext, DaemonStats, SyncTask};
use crate::protocol::val_snaps::check_against;
use crate::protocol::{announce_from_buffer, publish_from_buffer, val_snaps_from_buffer, ProtocolError};
use crate::pubs::{wall_time, ValueSnapshot};
use crate::wire::{MsgHeader, MsgType};
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub(crate) fn run_local_sync(ctx: Arc<DaemonContext>) {
    while let Some(frame) = ctx.local_pipe.pop() {
        let task = match apply_message(&ctx, &frame, wall_time()) {
            Ok(task) => task,
            Err(e) => {
                DaemonStats::bump(&ctx.stats.protocol_errors);
                warn!(error = %e, "local-sync rejected message");
                continue;
            }
        };
        DaemonStats::bump(&ctx.stats.applied);

        if let Err(rejected) = ctx.db_pipe.push(task) {
            warn!(pub_guid = rejected.item.pub_guid, "db-sync closed, task dropped");
        }
        if let Some(cloud) = &ctx.cloud_pipe {
            if let Err(rejected) = cloud.push(frame) {
                warn!(bytes = rejected.item.len(), "cloud-sync closed, buffer dropped");
            }
        }
    }
    debug!("local-sync drained");
}

/// Apply one ANNOUNCE, PUBLISH or VAL_SNAPS to the pub table.
pub(crate) fn apply_message(
    ctx: &DaemonContext,
    frame: &[u8],
    recv_time: f64,
) -> Result<SyncTask, ProtocolError> {
    let header = MsgHeader::peek(frame)?;
    let pub_guid = header.pub_guid;

    let entry = match header.msg_type {
        MsgType::Announce => {
            let (entry, created) = ctx.pubs.get_or_create(pub_guid);
            let applied = announce_from_buffer(&mut entry.lock().pub_, frame);
            if let Err(e) = applied {
                if created {
                    ctx.pubs.remove(pub_guid);
                }
                return Err(e);
            }
            trace!(pub_guid, created, "announce applied");
            entry
        }
        MsgType::Publish => {
            let entry = ctx
                .pubs
                .get(pub_guid)
                .ok_or(ProtocolError::UnknownPub(pub_guid))?;
            {
                let mut e = entry.lock();
                let (_, slots) = publish_from_buffer(&mut e.pub_, frame, recv_time)?;
                e.frame += 1;
                let frame_no = e.frame;
                for slot in slots {
                    if let Some(snap) = ValueSnapshot::capture(&e.pub_, slot, frame_no) {
                        e.snaps.push(snap);
                    }
                }
                trace!(pub_guid, frame = frame_no, queued = e.snaps.len(), "publish applied");
            }
            entry
        }
        MsgType::ValSnaps => {
            let (_, snaps) = val_snaps_from_buffer(frame)?;
            let entry = ctx
                .pubs
                .get(pub_guid)
                .ok_or(ProtocolError::UnknownPub(pub_guid))?;
            {
                let mut e = entry.lock();
                check_against(&e.pub_, &snaps)?;
                for snap in snaps {
                    e.snaps.push(snap);
                }
            }
            entry
        }
        other => {
            return Err(ProtocolError::UnexpectedType {
                expected: MsgType::Publish,
                got: other,
            })
        }
    };

    Ok(SyncTask {
        pub_guid,
        msg_type: header.msg_type,
        entry,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DaemonConfig;
    use crate::guid::GuidAllocator;
    use crate::protocol::{announce_to_buffer, publish_to_buffer_at, val_snaps_to_buffer};
    use crate::pubs::{Pub, TimeStamps, ValState, ValType, Value};

    fn context() -> DaemonContext {
        DaemonContext::new(
            DaemonConfig::test(),
            GuidAllocator::new(1, 1000),
            "127.0.0.1:1".parse().unwrap(),
            false,
        )
        .unwrap()
    }

    fn client_pub(ids: &GuidAllocator) -> Pub {
        let mut p = Pub::new("T");
        p.guid = ids.next_id().unwrap();
        p.pack(ids, "x", 42).unwrap();
        p
    }

    #[test]
    fn test_announce_then_publish_scenario() {
        let ctx = context();
        let ids = GuidAllocator::new(5000, 6000);
        let p = client_pub(&ids);

        apply_message(&ctx, &announce_to_buffer(&p, 1).unwrap(), 1.0).unwrap();
        let publish = publish_to_buffer_at(&p, 1, 2.0).unwrap().unwrap();
        let task = apply_message(&ctx, &publish.msg, 3.0).unwrap();
        assert_eq!(task.msg_type, MsgType::Publish);

        let daemon_pub = ctx.pubs.snapshot(p.guid).unwrap();
        assert_eq!(daemon_pub.elem_count(), 1);
        let elem = &daemon_pub.data()[0];
        assert_eq!(elem.name, "x");
        assert_eq!(elem.val_type, ValType::Int);
        assert_eq!(elem.value(), Some(&Value::Int(42)));
        assert_eq!(elem.state, ValState::Clean);

        let entry = task.entry.lock();
        assert_eq!(entry.frame, 1);
        assert_eq!(entry.snaps.len(), 1);
    }

    #[test]
    fn test_publish_for_unknown_pub_rejected() {
        let ctx = context();
        let ids = GuidAllocator::new(5000, 6000);
        let p = client_pub(&ids);
        let publish = publish_to_buffer_at(&p, 1, 2.0).unwrap().unwrap();
        assert_eq!(
            apply_message(&ctx, &publish.msg, 3.0).unwrap_err(),
            ProtocolError::UnknownPub(p.guid)
        );
        assert!(ctx.pubs.is_empty());
    }

    #[test]
    fn test_malformed_announce_leaves_no_entry() {
        let ctx = context();
        let ids = GuidAllocator::new(5000, 6000);
        let p = client_pub(&ids);
        let announce = announce_to_buffer(&p, 1).unwrap();
        let mut bad = announce.to_vec();
        bad.truncate(bad.len() - 3);
        let bad_len = bad.len() as i32;
        bad[..4].copy_from_slice(&bad_len.to_be_bytes());
        assert!(apply_message(&ctx, &bad, 1.0).is_err());
        assert!(ctx.pubs.get(p.guid).is_none());
    }

    #[test]
    fn test_val_snaps_checked_and_queued() {
        let ctx = context();
        let ids = GuidAllocator::new(5000, 6000);
        let p = client_pub(&ids);
        apply_message(&ctx, &announce_to_buffer(&p, 1).unwrap(), 1.0).unwrap();

        let snap = ValueSnapshot {
            elem_index: 0,
            guid: p.data()[0].guid,
            frame: 9,
            time: TimeStamps {
                pack: 1.0,
                send: 2.0,
                recv: 3.0,
            },
            value: Value::Int(7),
        };
        let good = val_snaps_to_buffer(p.guid, 1, &[snap.clone()]).unwrap().unwrap();
        let task = apply_message(&ctx, &good, 4.0).unwrap();
        assert_eq!(task.entry.lock().snaps.len(), 1);

        let wrong = ValueSnapshot {
            value: Value::Double(7.0),
            ..snap
        };
        let bad = val_snaps_to_buffer(p.guid, 1, &[wrong]).unwrap().unwrap();
        assert!(matches!(
            apply_message(&ctx, &bad, 5.0),
            Err(ProtocolError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_control_message_not_applicable() {
        let ctx = context();
        let msg = crate::wire::header_only(MsgType::CheckIn, 1, 0);
        assert!(matches!(
            apply_message(&ctx, &msg, 0.0),
            Err(ProtocolError::UnexpectedType { .. })
        ));
    }
}
