//! Device discovery and capability queries.

use ocl::core::{DeviceInfo as Info, DeviceInfoResult};
use ocl::{Device, Platform};

use oclink_core::device::DeviceInfo;

/// Every device of every platform, in platform order.
pub(crate) fn list_devices() -> ocl::Result<Vec<(Platform, Device)>> {
    let mut devices = Vec::new();
    for platform in Platform::list() {
        for device in Device::list_all(platform)? {
            devices.push((platform, device));
        }
    }
    Ok(devices)
}

/// Capability snapshot of `device`. Fields the driver refuses to report stay at their defaults.
pub(crate) fn query_device_info(device: &Device) -> DeviceInfo {
    let mut info = DeviceInfo::default();

    if let Ok(size) = device.max_wg_size() {
        info.max_work_group_size = size;
    }
    if let Ok(name) = device.name() {
        info.name = name;
    }
    if let Ok(vendor) = device.vendor() {
        info.vendor = vendor;
    }
    if let Ok(version) = device.version() {
        info.version = version.to_string();
    }

    for request in [
        Info::MaxWorkItemDimensions,
        Info::MaxWorkItemSizes,
        Info::GlobalMemSize,
        Info::LocalMemSize,
        Info::ImageSupport,
        Info::Image2dMaxWidth,
        Info::Image2dMaxHeight,
        Info::MaxComputeUnits,
        Info::MaxClockFrequency,
        Info::MaxMemAllocSize,
    ] {
        match device.info(request) {
            Ok(DeviceInfoResult::MaxWorkItemDimensions(n)) => info.max_work_group_dimensions = n as usize,
            Ok(DeviceInfoResult::MaxWorkItemSizes(sizes)) => info.max_work_items_per_dimension = sizes,
            Ok(DeviceInfoResult::GlobalMemSize(n)) => info.max_global_memory = n,
            Ok(DeviceInfoResult::LocalMemSize(n)) => info.max_local_memory = n,
            Ok(DeviceInfoResult::ImageSupport(b)) => info.image_support = b,
            Ok(DeviceInfoResult::Image2dMaxWidth(n)) => info.max_image2d_size[0] = n,
            Ok(DeviceInfoResult::Image2dMaxHeight(n)) => info.max_image2d_size[1] = n,
            Ok(DeviceInfoResult::MaxComputeUnits(n)) => info.max_compute_units = n,
            Ok(DeviceInfoResult::MaxClockFrequency(n)) => info.max_clock_frequency = n,
            Ok(DeviceInfoResult::MaxMemAllocSize(n)) => info.max_alloc_size = n,
            Ok(_) => {}
            Err(err) => tracing::debug!(?request, error = %err, "Device info query failed"),
        }
    }

    info
}
