pub mod analysis;
pub mod deep_filter;
pub mod dtln_denoiser;
pub mod fft;
pub mod noise_estimate;
pub mod resample;
pub mod rnn_denoiser;
pub mod spectral_denoiser;
pub mod stft;
pub mod utils;
pub mod vad;
pub mod vendor;

pub use analysis::{
    compute_crest_factor, compute_peak, compute_rms, compute_spectrogram, estimate_snr, Metrics,
    Rms, Spectrogram, WaveformOverview,
};
pub use deep_filter::DeepFilterEngine;
pub use dtln_denoiser::DtlnEngine;
pub use fft::FftCache;
pub use resample::{resample, resample_buffer, resampled_len, StreamResampler};
pub use rnn_denoiser::RnnEngine;
pub use spectral_denoiser::SpectralEngine;
pub use vad::{apply_vad, SpeechRegion, VadOutput};
pub use vendor::{VendorEngine, VendorSdk, VendorSession};
