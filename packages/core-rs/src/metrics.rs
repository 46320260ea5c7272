use std::sync::atomic::{AtomicUsize, Ordering};

static HOST_TO_DEVICE: AtomicUsize = AtomicUsize::new(0);
static DEVICE_TO_HOST: AtomicUsize = AtomicUsize::new(0);
static DEVICE_TO_DEVICE: AtomicUsize = AtomicUsize::new(0);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub host_to_device: u64,
    pub device_to_host: u64,
    pub device_to_device: u64,
}

pub(crate) fn record_upload(bytes: usize) {
    HOST_TO_DEVICE.fetch_add(bytes, Ordering::Relaxed);
}

pub(crate) fn record_download(bytes: usize) {
    DEVICE_TO_HOST.fetch_add(bytes, Ordering::Relaxed);
}

pub(crate) fn record_device_copy(bytes: usize) {
    DEVICE_TO_DEVICE.fetch_add(bytes, Ordering::Relaxed);
}

/// Bytes moved since process start or the last reset.
pub fn transfer_stats() -> TransferStats {
    TransferStats {
        host_to_device: HOST_TO_DEVICE.load(Ordering::Relaxed) as u64,
        device_to_host: DEVICE_TO_HOST.load(Ordering::Relaxed) as u64,
        device_to_device: DEVICE_TO_DEVICE.load(Ordering::Relaxed) as u64,
    }
}

pub fn take_transfer_stats() -> TransferStats {
    TransferStats {
        host_to_device: HOST_TO_DEVICE.swap(0, Ordering::Relaxed) as u64,
        device_to_host: DEVICE_TO_HOST.swap(0, Ordering::Relaxed) as u64,
        device_to_device: DEVICE_TO_DEVICE.swap(0, Ordering::Relaxed) as u64,
    }
}

pub fn reset_transfer_stats() {
    HOST_TO_DEVICE.store(0, Ordering::Relaxed);
    DEVICE_TO_HOST.store(0, Ordering::Relaxed);
    DEVICE_TO_DEVICE.store(0, Ordering::Relaxed);
}
