fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Client stubs for the agent, server stubs for the in-process test authority
    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_protos(&["proto/podsentinel/v1/agent.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto");
    Ok(())
}
