//! Wire protocol for frame updates
//!
//! One update message carries, per side: the latest frame that side has
//! results for, a bounded `future-delta` announcing how many frames of
//! not-yet-authoritative input follow, then one block per subscribed kind
//! with each instance's authoritative state at the send frame and, when
//! `future-delta > 0`, the input for the send frame followed by the inputs
//! for the frames after it.
//!
//! The receiving side stages the decoded result as a pending authoritative
//! snapshot for the next reconciliation pass; it never applies it
//! immediately.

use crate::reconcile::{AuthorityEntry, AuthoritySnapshot};
use crate::wire::{Reader, Writer};
use resim_core::{Frame, InstanceId, KindId, SimModel};
use std::collections::BTreeMap;

/// Fixed prelude of one update message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateHeader {
    /// Latest frame the sender has results for
    pub frame: Frame,
    /// How many frames of input follow per instance (0..=configured max)
    pub future_delta: u8,
    /// Number of kind blocks that follow
    pub kind_count: u16,
}

/// Write the message prelude
pub fn write_header(writer: &mut Writer, header: &UpdateHeader) {
    writer.put_u64(header.frame);
    writer.put_u8(header.future_delta);
    writer.put_u16(header.kind_count);
}

/// Read the message prelude, enforcing the configured future-delta cap
pub fn read_header(reader: &mut Reader<'_>, max_future_delta: u8) -> crate::Result<UpdateHeader> {
    let frame = reader.get_u64()?;
    let future_delta = reader.get_u8()?;
    if future_delta > max_future_delta {
        return Err(crate::Error::FutureDeltaTooLarge {
            got: future_delta,
            max: max_future_delta,
        });
    }
    let kind_count = reader.get_u16()?;
    Ok(UpdateHeader {
        frame,
        future_delta,
        kind_count,
    })
}

/// Write one kind block's tag
pub fn write_kind_id(writer: &mut Writer, kind: KindId) {
    writer.put_u16(kind.0);
}

/// Read one kind block's tag
pub fn read_kind_id(reader: &mut Reader<'_>) -> crate::Result<KindId> {
    Ok(KindId(reader.get_u16()?))
}

/// Encode one kind's block body
///
/// Per instance: the state at the send frame, then up to `future_delta`
/// input commands starting at the send frame itself.
pub fn write_kind_body<M: SimModel>(
    writer: &mut Writer,
    entries: &BTreeMap<InstanceId, AuthorityEntry<M>>,
    future_delta: u8,
) -> crate::Result<()> {
    writer.put_u32(entries.len() as u32);
    for (id, entry) in entries {
        writer.put_i64(id.raw());
        writer.put_blob(&entry.state)?;
        let count = entry.future_inputs.len().min(future_delta as usize) as u8;
        writer.put_u8(count);
        for input in entry.future_inputs.iter().take(count as usize) {
            writer.put_blob(input)?;
        }
    }
    Ok(())
}

/// Decode one kind's block body written by [`write_kind_body`]
///
/// `frame` is the send frame already mapped into the local frame line.
pub fn read_kind_body<M: SimModel>(
    reader: &mut Reader<'_>,
    frame: Frame,
    future_delta: u8,
) -> crate::Result<AuthoritySnapshot<M>> {
    let mut snapshot = AuthoritySnapshot::new(frame);
    let count = reader.get_u32()?;
    for _ in 0..count {
        let id = InstanceId::new(reader.get_i64()?);
        let state: M::NetState = reader.get_blob()?;
        let input_count = reader.get_u8()?;
        if input_count > future_delta {
            return Err(crate::Error::FutureDeltaTooLarge {
                got: input_count,
                max: future_delta,
            });
        }
        let mut future_inputs = Vec::with_capacity(input_count as usize);
        for _ in 0..input_count {
            future_inputs.push(reader.get_blob::<M::Input>()?);
        }
        snapshot.entries.insert(
            id,
            AuthorityEntry {
                state,
                future_inputs,
            },
        );
    }
    Ok(snapshot)
}
