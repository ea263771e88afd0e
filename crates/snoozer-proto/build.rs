fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    println!("cargo:rerun-if-changed=proto/snoozer.proto");
    tonic_build::configure().compile(&["proto/snoozer.proto"], &["proto"])?;
    Ok(())
}
