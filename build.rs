//! Build script for respool.
//!
//! Prints feature notes for users integrating respool into their projects.

use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_GPU_VULKAN");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_PARKING_LOT");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_LOG");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_DIAGNOSTICS");

    let vulkan_enabled = env::var("CARGO_FEATURE_GPU_VULKAN").is_ok();
    let parking_lot_enabled = env::var("CARGO_FEATURE_PARKING_LOT").is_ok();
    let log_enabled = env::var("CARGO_FEATURE_LOG").is_ok();
    let diagnostics_enabled = env::var("CARGO_FEATURE_DIAGNOSTICS").is_ok();

    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    let is_release = profile == "release";

    // --- Vulkan backend ---
    if vulkan_enabled {
        emit_info("Vulkan backend enabled (ash + gpu-allocator)");
        emit_note("Build a pool on it with:");
        emit_note("  let allocator = unsafe { VulkanAllocator::new(&instance, device, physical_device)? };");
        emit_note("  let mut pool = Pool::new(allocator);");

        let target = env::var("TARGET").unwrap_or_default();
        if target.contains("wasm") {
            emit_warning("'gpu-vulkan' enabled for a WebAssembly target");
            emit_note("Vulkan is not available on wasm; use DummyAllocator there.");
        }
    }

    // --- Diagnostics ---
    if diagnostics_enabled && is_release {
        emit_info("Diagnostics enabled in release build");
        emit_note("RPxxx diagnostics will be printed to stderr.");
    }
    if diagnostics_enabled && !log_enabled {
        emit_note("Tip: enable 'log' to route diagnostics and pool tracing through the log crate");
    }

    // --- Parking Lot ---
    if parking_lot_enabled {
        emit_info("Using parking_lot for mutexes (faster lock implementation)");
    } else if is_release {
        emit_note("Tip: Consider enabling 'parking_lot' for better mutex performance:");
        emit_note("  respool = { version = \"0.1\", features = [\"parking_lot\"] }");
    }
}

fn emit_info(msg: &str) {
    println!("cargo:warning=[respool] {}", msg);
}

fn emit_note(msg: &str) {
    println!("cargo:warning=[respool]    {}", msg);
}

fn emit_warning(msg: &str) {
    println!("cargo:warning=[respool] warning: {}", msg);
}
