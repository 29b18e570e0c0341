fn main() {
    // ESP-IDF link arguments only exist when cross-compiling for the device
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }

    for var in [
        "SOIL_WIFI_SSID",
        "SOIL_WIFI_PASS",
        "SOIL_ACCESS_TOKEN",
        "SOIL_OTA_PASSWORD",
        "SOIL_ROOT_CA",
    ] {
        println!("cargo:rerun-if-env-changed={var}");
    }
    println!("cargo:rerun-if-changed=sdkconfig.defaults");
}
