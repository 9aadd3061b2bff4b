//! Backend selection for loss evaluation.
//!
//! Cargo features pick the tensor backend at compile time: `cuda`, then
//! `wgpu`, falling back to the CPU `ndarray` backend. Gradient inspection runs
//! on the same backend wrapped in [`Autodiff`].

use burn::backend::Autodiff;
use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(feature = "cuda")] {
        /// Backend the losses are evaluated on.
        pub type SelectedBackend = burn::backend::cuda::Cuda;
        const BACKEND_NAME: &str = "CUDA (NVIDIA GPU)";
    } else if #[cfg(feature = "wgpu")] {
        /// Backend the losses are evaluated on.
        pub type SelectedBackend = burn::backend::wgpu::Wgpu;
        const BACKEND_NAME: &str = "WGPU (GPU)";
    } else {
        /// Backend the losses are evaluated on.
        pub type SelectedBackend = burn::backend::ndarray::NdArray;
        const BACKEND_NAME: &str = "NdArray (CPU)";
    }
}

/// [`SelectedBackend`] with gradient tracking, for per-box gradient norms.
pub type SelectedAutodiffBackend = Autodiff<SelectedBackend>;

/// Device of the selected backend; shared by its autodiff wrapper.
pub type SelectedDevice = <SelectedBackend as burn::tensor::backend::Backend>::Device;

/// Creates the default device of the selected backend.
pub fn create_device() -> SelectedDevice {
    SelectedDevice::default()
}

/// Backend name for logging.
pub const fn get_backend_name() -> &'static str {
    BACKEND_NAME
}

#[cfg(test)]
mod tests {
    use burn::tensor::{backend::Backend, Tensor};

    use super::*;

    #[test]
    fn autodiff_backend_shares_the_selected_device() {
        let device = create_device();
        let plain = Tensor::<SelectedBackend, 1>::ones([2], &device);
        let tracked = Tensor::<SelectedAutodiffBackend, 1>::ones([2], &device);

        assert_eq!(plain.device(), tracked.device());
        assert!(!get_backend_name().is_empty());
        assert!(<SelectedAutodiffBackend as Backend>::ad_enabled());
        assert!(!<SelectedBackend as Backend>::ad_enabled());
    }
}
