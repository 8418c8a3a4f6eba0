use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=STOCK_LEDGER_ZLIB_DIR");
    // librdkafka's zlib is only linked when the kafka adapters are compiled in.
    if env::var_os("CARGO_FEATURE_KAFKA_PRODUCER").is_none() {
        return;
    }
    if let Some(dir) = env::var_os("STOCK_LEDGER_ZLIB_DIR") {
        println!("cargo:rustc-link-search=native={}", dir.to_string_lossy());
    }
    if cfg!(target_os = "windows") {
        println!("cargo:rustc-link-lib=zlib");
    } else {
        println!("cargo:rustc-link-lib=static=z");
    }
}
