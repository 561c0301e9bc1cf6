//! Backend abstraction - Multi-backend support
//!
//! CUDA (GPU) when built with the `cuda` feature, NdArray (CPU) otherwise.
//! Mixed-precision runs use the CUDA backend with `f16` floats; NdArray only
//! computes in `f32`/`f64`.

use burn::backend::Autodiff;

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(all(not(feature = "cuda"), any(feature = "ndarray", feature = "cpu")))]
pub type DefaultBackend = burn_ndarray::NdArray;

#[cfg(all(not(feature = "cuda"), not(feature = "ndarray"), not(feature = "cpu")))]
compile_error!("At least one backend (cuda, ndarray, or cpu) must be enabled!");

/// The default autodiff backend for training
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Half-precision float backend for mixed-precision runs. Shares the device
/// type of [`DefaultBackend`].
#[cfg(feature = "cuda")]
pub type HalfPrecisionBackend = burn_cuda::Cuda<half::f16>;

/// Autodiff wrapper of [`HalfPrecisionBackend`]
#[cfg(feature = "cuda")]
pub type HalfTrainingBackend = Autodiff<HalfPrecisionBackend>;

/// Device type of the selected backend
pub type Device = <DefaultBackend as burn::tensor::backend::Backend>::Device;

/// Get the default device
pub fn default_device() -> Device {
    Device::default()
}

/// Get a human-readable name for the current backend
pub fn backend_name() -> &'static str {
    #[cfg(feature = "cuda")]
    {
        "CUDA (GPU)"
    }

    #[cfg(all(not(feature = "cuda"), any(feature = "ndarray", feature = "cpu")))]
    {
        "NdArray (CPU)"
    }
}

/// Whether a half-precision backend is compiled in
pub fn supports_mixed_precision() -> bool {
    cfg!(feature = "cuda")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(feature = "cuda"))]
    fn test_cpu_backend_has_no_mixed_precision() {
        assert_eq!(backend_name(), "NdArray (CPU)");
        assert!(!supports_mixed_precision());
    }

    #[test]
    #[cfg(feature = "cuda")]
    fn test_half_backend_uses_f16() {
        use burn::tensor::{backend::Backend, DType, Element};
        assert!(supports_mixed_precision());
        assert_eq!(<<HalfPrecisionBackend as Backend>::FloatElem as Element>::dtype(), DType::F16);
    }
}
