//! Slice generation and reconstruction
//!
//! Objects are split into `data` contiguous slices, zero-padded to a multiple
//! of the slice size, and `parity` redundant slices are computed with the
//! Reed-Solomon backend. Per-slice checksums are computed concurrently with
//! the parity calculation. Reconstruction accepts any `data` surviving slices.

use crate::backing::SliceBacking;
use crate::metadata::{slice_size, SliceMeta};
use bytes::Bytes;
use reed_solomon_simd::{ReedSolomonDecoder, ReedSolomonEncoder};
use strata_cluster::Lom;
use strata_common::checksum::{Checksum, ChecksumType};
use strata_common::{Error, Result};

/// One staged outbound slice
#[derive(Debug)]
pub struct EncodedSlice {
    /// 1-based position: 1..=data are data slices, data+1..=data+parity parity
    pub slice_id: usize,
    pub backing: SliceBacking,
    pub cksum: Option<Checksum>,
}

fn rs_err(e: impl std::fmt::Display) -> Error {
    Error::internal(format!("reed-solomon: {e}"))
}

/// Zero-pad `payload` to `data * slice_size` and return the padded buffer
fn pad_payload(payload: &[u8], data: usize, ss: usize) -> Bytes {
    let total = data * ss;
    if payload.len() == total {
        return Bytes::copy_from_slice(payload);
    }
    let mut padded = Vec::with_capacity(total);
    padded.extend_from_slice(payload);
    padded.resize(total, 0);
    Bytes::from(padded)
}

/// Split the object into data slices and compute parity slices.
///
/// With `to_disk`, outbound payloads are staged through mountpath workfiles;
/// otherwise they stay in memory. Data-slice checksums are computed in a
/// separate thread while the parity calculation runs.
pub fn generate_slices(
    lom: &Lom,
    data: usize,
    parity: usize,
    cksum_ty: ChecksumType,
    to_disk: bool,
) -> Result<Vec<EncodedSlice>> {
    let payload = lom.load_payload()?;
    let ss = slice_size(payload.len() as u64, data);
    let padded = pad_payload(&payload, data, ss);
    drop(payload);

    let data_chunks: Vec<Bytes> = (0..data).map(|i| padded.slice(i * ss..(i + 1) * ss)).collect();

    // parity + data-slice checksums, concurrently
    let scoped: Result<(Vec<Bytes>, Vec<Option<Checksum>>)> = std::thread::scope(|scope| {
        let cksum_handle = scope.spawn(|| -> Vec<Option<Checksum>> {
            data_chunks
                .iter()
                .map(|c| {
                    (cksum_ty != ChecksumType::None).then(|| Checksum::compute(cksum_ty, c))
                })
                .collect()
        });

        let mut encoder = ReedSolomonEncoder::new(data, parity, ss).map_err(rs_err)?;
        for chunk in &data_chunks {
            encoder.add_original_shard(chunk).map_err(rs_err)?;
        }
        let encoded = encoder.encode().map_err(rs_err)?;
        let parity_chunks: Vec<Bytes> = encoded
            .recovery_iter()
            .map(Bytes::copy_from_slice)
            .collect();

        let data_cksums = cksum_handle
            .join()
            .map_err(|_| Error::internal("checksum thread panicked"))?;
        Ok((parity_chunks, data_cksums))
    });
    let (parity_chunks, data_cksums) = scoped?;

    let mut slices = Vec::with_capacity(data + parity);
    for (i, (chunk, cksum)) in data_chunks.into_iter().zip(data_cksums).enumerate() {
        slices.push(stage(lom, i + 1, chunk, cksum, to_disk)?);
    }
    for (i, chunk) in parity_chunks.into_iter().enumerate() {
        let cksum =
            (cksum_ty != ChecksumType::None).then(|| Checksum::compute(cksum_ty, &chunk));
        slices.push(stage(lom, data + i + 1, chunk, cksum, to_disk)?);
    }
    Ok(slices)
}

fn stage(
    lom: &Lom,
    slice_id: usize,
    chunk: Bytes,
    cksum: Option<Checksum>,
    to_disk: bool,
) -> Result<EncodedSlice> {
    let backing = if to_disk {
        let wk = lom.workfile(&format!("ec-write-{slice_id}"))?;
        SliceBacking::to_file(wk, &chunk)?
    } else {
        SliceBacking::Mem(chunk)
    };
    Ok(EncodedSlice {
        slice_id,
        backing,
        cksum,
    })
}

/// Rebuild the object from surviving slices.
///
/// `present[i]` holds slice `i+1` if some target returned it. Returns the
/// reconstructed payload (truncated to the object size) and the complete
/// slice set for repairing targets that lost theirs.
pub fn reconstruct(meta: &SliceMeta, mut present: Vec<Option<Bytes>>) -> Result<(Vec<u8>, Vec<Bytes>)> {
    let (k, m) = (meta.data, meta.parity);
    if present.len() != k + m {
        return Err(Error::internal(format!(
            "expected {} slice positions, got {}",
            k + m,
            present.len()
        )));
    }
    let ss = slice_size(meta.size, k);
    // drop truncated or corrupt transfers
    for slot in present.iter_mut() {
        if slot.as_ref().map(|b| b.len() != ss).unwrap_or(false) {
            *slot = None;
        }
    }
    let available = present.iter().filter(|s| s.is_some()).count();
    if available < k {
        return Err(Error::SlicesInsufficient {
            found: available,
            need: k,
        });
    }

    let data_complete = present[..k].iter().all(Option::is_some);
    if !data_complete {
        let mut decoder = ReedSolomonDecoder::new(k, m, ss).map_err(rs_err)?;
        for (i, slot) in present.iter().enumerate().take(k) {
            if let Some(chunk) = slot {
                decoder.add_original_shard(i, chunk).map_err(rs_err)?;
            }
        }
        for (i, slot) in present.iter().enumerate().skip(k) {
            if let Some(chunk) = slot {
                decoder.add_recovery_shard(i - k, chunk).map_err(rs_err)?;
            }
        }
        let decoded = decoder.decode().map_err(rs_err)?;
        for i in 0..k {
            if present[i].is_none() {
                let restored = decoded
                    .restored_original(i)
                    .ok_or_else(|| Error::internal(format!("failed to restore slice {}", i + 1)))?;
                present[i] = Some(Bytes::copy_from_slice(restored));
            }
        }
    }

    // payload = first k slices, truncated to the object size
    let mut payload = Vec::with_capacity(k * ss);
    for slot in present.iter().take(k) {
        payload.extend_from_slice(slot.as_ref().expect("data slices complete"));
    }
    payload.truncate(meta.size as usize);

    // re-derive missing parity so every position can be re-uploaded
    if present[k..].iter().any(Option::is_none) {
        let mut encoder = ReedSolomonEncoder::new(k, m, ss).map_err(rs_err)?;
        for slot in present.iter().take(k) {
            encoder
                .add_original_shard(slot.as_ref().expect("data slices complete"))
                .map_err(rs_err)?;
        }
        let encoded = encoder.encode().map_err(rs_err)?;
        for (i, parity_chunk) in encoded.recovery_iter().enumerate() {
            if present[k + i].is_none() {
                present[k + i] = Some(Bytes::copy_from_slice(parity_chunk));
            }
        }
    }

    let all = present
        .into_iter()
        .map(|s| s.expect("all positions filled"))
        .collect();
    Ok((payload, all))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(size: u64, data: usize, parity: usize) -> SliceMeta {
        SliceMeta {
            size,
            data,
            parity,
            is_copy: false,
            slice_id: 0,
            obj_cksum: None,
            slice_cksum: None,
            obj_version: None,
        }
    }

    fn encode_buf(payload: &[u8], k: usize, m: usize) -> Vec<Bytes> {
        let ss = slice_size(payload.len() as u64, k);
        let padded = pad_payload(payload, k, ss);
        let mut encoder = ReedSolomonEncoder::new(k, m, ss).unwrap();
        let mut out: Vec<Bytes> = (0..k).map(|i| padded.slice(i * ss..(i + 1) * ss)).collect();
        for chunk in &out {
            encoder.add_original_shard(chunk).unwrap();
        }
        let encoded = encoder.encode().unwrap();
        out.extend(encoded.recovery_iter().map(Bytes::copy_from_slice));
        out
    }

    #[test]
    fn roundtrip_no_losses() {
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let slices = encode_buf(&payload, 3, 2);
        let present = slices.into_iter().map(Some).collect();
        let (restored, all) = reconstruct(&meta(payload.len() as u64, 3, 2), present).unwrap();
        assert_eq!(restored, payload);
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn roundtrip_with_parity_worth_of_losses() {
        let payload: Vec<u8> = (0..77_777u32).map(|i| (i % 253) as u8).collect();
        let slices = encode_buf(&payload, 4, 2);
        let mut present: Vec<Option<Bytes>> = slices.into_iter().map(Some).collect();
        present[1] = None; // one data slice
        present[5] = None; // one parity slice
        let (restored, all) = reconstruct(&meta(payload.len() as u64, 4, 2), present).unwrap();
        assert_eq!(restored, payload);
        // every position refilled for re-upload
        assert!(all.iter().all(|b| !b.is_empty()));
    }

    #[test]
    fn too_many_losses() {
        let payload = vec![7u8; 10_000];
        let slices = encode_buf(&payload, 3, 1);
        let mut present: Vec<Option<Bytes>> = slices.into_iter().map(Some).collect();
        present[0] = None;
        present[2] = None;
        let err = reconstruct(&meta(payload.len() as u64, 3, 1), present).unwrap_err();
        assert!(matches!(
            err,
            Error::SlicesInsufficient { found: 2, need: 3 }
        ));
    }

    #[test]
    fn zero_byte_object() {
        let slices = encode_buf(&[], 2, 1);
        let mut present: Vec<Option<Bytes>> = slices.into_iter().map(Some).collect();
        present[0] = None;
        let (restored, _) = reconstruct(&meta(0, 2, 1), present).unwrap();
        assert!(restored.is_empty());
    }

    #[test]
    fn exact_slice_boundary() {
        // size divisible by k and even: padding-free split
        let ss = slice_size(4096, 4);
        assert_eq!(ss * 4, 4096);
        let payload = vec![42u8; 4096];
        let slices = encode_buf(&payload, 4, 1);
        let mut present: Vec<Option<Bytes>> = slices.into_iter().map(Some).collect();
        present[3] = None;
        let (restored, _) = reconstruct(&meta(4096, 4, 1), present).unwrap();
        assert_eq!(restored, payload);
    }
}
