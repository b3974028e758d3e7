fn main() {
    #[cfg(feature = "rtlsdr")]
    {
        println!("cargo:rustc-link-lib=rtlsdr");
    }

    #[cfg(feature = "hackrf")]
    {
        println!("cargo:rustc-link-lib=hackrf");
    }

    #[cfg(feature = "airspy")]
    {
        println!("cargo:rustc-link-lib=airspy");
    }

    #[cfg(feature = "bladerf")]
    {
        println!("cargo:rustc-link-lib=bladeRF");
    }
}
