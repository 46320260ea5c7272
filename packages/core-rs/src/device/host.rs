use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{BackendKind, BufferId, DeviceBackend};
use crate::error::{self, MatResult};
use crate::metrics;

const F32_BYTES: usize = std::mem::size_of::<f32>();

/// Device memory emulated by a registry of host vectors. Every transfer
/// goes through the same accounting as a real accelerator, including an
/// optional byte cap that surfaces as an out-of-memory device error.
#[derive(Debug)]
pub struct InProcessDevice {
    ordinal: usize,
    memory_limit: Option<usize>,
    next_id: AtomicU64,
    live_bytes: AtomicUsize,
    buffers: Mutex<HashMap<BufferId, Vec<f32>>>,
}

impl InProcessDevice {
    pub fn new(ordinal: usize, memory_limit: Option<usize>) -> Self {
        Self {
            ordinal,
            memory_limit,
            next_id: AtomicU64::new(1),
            live_bytes: AtomicUsize::new(0),
            buffers: Mutex::new(HashMap::new()),
        }
    }

    fn registry(&self) -> MatResult<MutexGuard<'_, HashMap<BufferId, Vec<f32>>>> {
        self.buffers
            .lock()
            .map_err(|_| error::device("in-process buffer registry poisoned"))
    }

    pub fn buffer_count(&self) -> usize {
        self.registry().map(|map| map.len()).unwrap_or(0)
    }
}

fn window(len: usize, offset: usize, count: usize, id: BufferId) -> MatResult<std::ops::Range<usize>> {
    let end = offset
        .checked_add(count)
        .filter(|&end| end <= len)
        .ok_or_else(|| {
            error::device(format!(
                "access {offset}+{count} outside buffer {id} of {len} elements"
            ))
        })?;
    Ok(offset..end)
}

impl DeviceBackend for InProcessDevice {
    fn kind(&self) -> BackendKind {
        BackendKind::InProcess
    }

    fn ordinal(&self) -> usize {
        self.ordinal
    }

    fn name(&self) -> String {
        format!("inprocess:{}", self.ordinal)
    }

    fn allocate(&self, len: usize) -> MatResult<BufferId> {
        let bytes = len
            .checked_mul(F32_BYTES)
            .ok_or_else(|| error::device("out of memory: allocation size overflows"))?;
        let mut map = self.registry()?;
        let live = self.live_bytes.load(Ordering::Relaxed);
        if let Some(limit) = self.memory_limit {
            if live + bytes > limit {
                return Err(error::device(format!(
                    "out of memory: {bytes} bytes requested, {live} of {limit} in use"
                )));
            }
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        map.insert(id, vec![0.0; len]);
        self.live_bytes.fetch_add(bytes, Ordering::Relaxed);
        Ok(id)
    }

    fn free(&self, id: BufferId) {
        if let Ok(mut map) = self.buffers.lock() {
            if let Some(buf) = map.remove(&id) {
                self.live_bytes
                    .fetch_sub(buf.len() * F32_BYTES, Ordering::Relaxed);
            }
        }
    }

    fn upload(&self, id: BufferId, offset: usize, src: &[f32]) -> MatResult<()> {
        let mut map = self.registry()?;
        let buf = map
            .get_mut(&id)
            .ok_or_else(|| error::device(format!("unknown buffer {id}")))?;
        let range = window(buf.len(), offset, src.len(), id)?;
        buf[range].copy_from_slice(src);
        metrics::record_upload(src.len() * F32_BYTES);
        Ok(())
    }

    fn download(&self, id: BufferId, offset: usize, dst: &mut [f32]) -> MatResult<()> {
        let map = self.registry()?;
        let buf = map
            .get(&id)
            .ok_or_else(|| error::device(format!("unknown buffer {id}")))?;
        let range = window(buf.len(), offset, dst.len(), id)?;
        dst.copy_from_slice(&buf[range]);
        metrics::record_download(dst.len() * F32_BYTES);
        Ok(())
    }

    fn copy_device(
        &self,
        src: BufferId,
        src_offset: usize,
        dst: BufferId,
        dst_offset: usize,
        len: usize,
    ) -> MatResult<()> {
        let mut map = self.registry()?;
        if src == dst {
            let buf = map
                .get_mut(&src)
                .ok_or_else(|| error::device(format!("unknown buffer {src}")))?;
            let from = window(buf.len(), src_offset, len, src)?;
            window(buf.len(), dst_offset, len, dst)?;
            buf.copy_within(from, dst_offset);
        } else {
            let staged = {
                let buf = map
                    .get(&src)
                    .ok_or_else(|| error::device(format!("unknown buffer {src}")))?;
                let from = window(buf.len(), src_offset, len, src)?;
                buf[from].to_vec()
            };
            let buf = map
                .get_mut(&dst)
                .ok_or_else(|| error::device(format!("unknown buffer {dst}")))?;
            let to = window(buf.len(), dst_offset, len, dst)?;
            buf[to].copy_from_slice(&staged);
        }
        metrics::record_device_copy(len * F32_BYTES);
        Ok(())
    }

    fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Relaxed)
    }
}
