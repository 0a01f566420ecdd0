// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

fn main() -> Result<(), Box<dyn std::error::Error>> {
    build_protos()?;
    Ok(())
}

// Client stubs only, the gateway never serves these RPCs
fn build_protos() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure()
        .build_server(false)
        .compile_protos(
            &["riva_asr.proto", "studiovoice.proto"],
            &["src/grpc/protos"],
        )?;
    Ok(())
}
