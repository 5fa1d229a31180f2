extern crate bindgen;

use std::env;
use std::path::PathBuf;

fn main() {
    println!("You need to have librdmacm and libibverbs installed in your system.");
    println!("cargo:rerun-if-changed=src/rdma_wrapper.h");
    println!("cargo:rustc-link-lib=ibverbs");
    println!("cargo:rustc-link-lib=rdmacm");

    let bindings = bindgen::Builder::default()
        .header("src/rdma_wrapper.h")
        .parse_callbacks(Box::new(bindgen::CargoCallbacks))
        .allowlist_function("rdma_.*")
        .allowlist_function("ibv_.*")
        .allowlist_type("rdma_.*")
        .allowlist_type("ibv_.*")
        .blocklist_type("max_align_t")
        .bitfield_enum("ibv_access_flags")
        .constified_enum_module("ibv_qp_type")
        .constified_enum_module("ibv_wc_opcode")
        .constified_enum_module("ibv_wc_status")
        .constified_enum_module("rdma_port_space")
        .constified_enum_module("rdma_cm_event_type")
        .derive_default(true)
        .derive_debug(true)
        .generate()
        .expect("Unable to generate bindings");

    // Write the bindings to the $OUT_DIR/bindings.rs file.
    let out_path = PathBuf::from(env::var("OUT_DIR").unwrap());
    bindings
        .write_to_file(out_path.join("bindings.rs"))
        .expect("Couldn't write bindings!");
}
