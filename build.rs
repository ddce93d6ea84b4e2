use std::env;

fn main() {
    // 告诉 cargo 在 build.rs 变化时重新运行
    println!("cargo:rerun-if-changed=build.rs");

    // 只有固件示例需要 esp-hal 的链接脚本，主机端单元测试不受影响
    if env::var_os("CARGO_FEATURE_ESP32S3").is_some() {
        println!("cargo:rustc-link-arg-examples=-Tlinkall.x");
    }
}
