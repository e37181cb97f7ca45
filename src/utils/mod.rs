use anyhow::Result;
use candle_core::{
    utils::{cuda_is_available, metal_is_available},
    Device,
};
use tracing::debug;

/// CUDA first, then Metal, otherwise the CPU.
pub fn select_device(force_cpu: bool) -> Result<Device> {
    let device = if force_cpu {
        Device::Cpu
    } else if cuda_is_available() {
        Device::new_cuda(0)?
    } else if metal_is_available() {
        Device::new_metal(0)?
    } else {
        Device::Cpu
    };
    debug!("Selected device: {:?}", device.location());
    Ok(device)
}

/// Human-readable device name for logs.
pub fn device_name(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Cuda(_) => "cuda",
        Device::Metal(_) => "metal",
    }
}

/// Whether `device` is a CUDA GPU of compute capability 8.0 or higher,
/// the first generation with native bf16. False off CUDA.
pub fn is_ampere_or_newer(device: &Device) -> bool {
    match device {
        #[cfg(feature = "cuda")]
        Device::Cuda(cuda) => {
            use candle_core::cuda_backend::cudarc::driver::sys::CUdevice_attribute;

            let dev = cuda.cuda_device();
            let major = dev
                .attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR)
                .unwrap_or(0);
            let minor = dev
                .attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR)
                .unwrap_or(0);
            tracing::info!("CUDA compute capability: {major}.{minor}");
            major >= 8
        }
        _ => false,
    }
}
