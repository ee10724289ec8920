//! Splitting RTCP compound datagrams into one RTCP packet per unit.

use crate::wire_unit::WireUnit;
use log::{debug, warn};
use rtcp::header::declared_packet_size;

/// Datagrams declaring more packets than this are left alone.
pub const MAX_PACKETS_PER_DATAGRAM: usize = 20;

/// Walks the header length fields and returns the number of complete RTCP
/// packets and the bytes they cover. Stops at the first declared length that
/// does not fit.
fn measure(bytes: &[u8]) -> (usize, usize) {
    let mut pos = 0;
    let mut count = 0;

    while let Some(size) = declared_packet_size(bytes, pos) {
        match pos.checked_add(size) {
            Some(end) if end <= bytes.len() => {
                count += 1;
                pos = end;
            }
            _ => break,
        }
    }

    (count, pos)
}

/// Counts the complete RTCP packets in a unit.
pub fn count_packets(unit: &WireUnit) -> usize {
    measure(unit.as_bytes()).0
}

/// Rewrites a batch so every unit holds exactly one RTCP packet.
///
/// Bytes after the last complete packet of a unit are cut off, and units
/// with no complete packet are dropped. Each multi-packet unit keeps its last
/// sub-packet in place while the earlier ones are copied into new units
/// appended to the batch in order. A batch that contains a unit with more
/// than [`MAX_PACKETS_PER_DATAGRAM`] packets is returned as is, and one that
/// already holds one packet per unit is returned without allocating.
pub fn split(mut batch: Vec<WireUnit>) -> Vec<WireUnit> {
    let measured: Vec<(usize, usize)> = batch.iter().map(|u| measure(u.as_bytes())).collect();

    if let Some(&(too_many, _)) = measured.iter().find(|(c, _)| *c > MAX_PACKETS_PER_DATAGRAM) {
        warn!("not splitting RTCP batch: datagram holds {too_many} packets");
        return batch;
    }

    for (unit, &(count, used)) in batch.iter_mut().zip(&measured) {
        let trailing = unit.length() - used;
        if count > 0 && trailing > 0 {
            debug!("cutting {trailing} bytes after {count} RTCP packets");
            if unit.shrink(trailing).is_err() {
                return batch;
            }
        }
    }

    let mut counts: Vec<usize> = measured.iter().map(|&(c, _)| c).collect();
    if counts.iter().all(|&c| c == 1) {
        return batch;
    }

    let mut i = 0;
    batch.retain(|_| {
        let keep = counts[i] > 0;
        i += 1;
        keep
    });
    let dropped = counts.len() - batch.len();
    if dropped > 0 {
        debug!("dropped {dropped} RTCP units without a complete packet");
    }
    counts.retain(|&c| c > 0);

    let total: usize = counts.iter().sum();
    let slots = batch.len();
    batch.reserve(total - slots);

    for (slot, count) in counts.iter_mut().enumerate() {
        while *count > 1 {
            let unit = &mut batch[slot];
            let Some(size) = declared_packet_size(unit.as_bytes(), 0) else {
                break;
            };
            let extracted = WireUnit::from_slice(&unit.as_bytes()[..size]);
            let (offset, length) = (unit.offset(), unit.length());
            if unit.set_offset_length(offset + size, length - size).is_err() {
                break;
            }
            batch.push(extracted);
            *count -= 1;
        }
    }

    batch
}
