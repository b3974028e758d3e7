pub mod downsampler;
