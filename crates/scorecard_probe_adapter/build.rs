fn main() {
    let proto_file = "proto/coaching.proto";
    println!("cargo:rerun-if-changed={proto_file}");
    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_protos(&[proto_file], &["proto"])
        .expect("coaching proto compilation must succeed");
}
