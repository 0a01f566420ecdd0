// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use nimkit_runtime::storage::key_value_store::{Key, Manager, Selector, StoreOutcome};
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Entry {
    host: String,
    port: u16,
}

#[tokio::test]
async fn test_file_store_survives_reopen() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let entry = Entry {
        host: "localhost".to_string(),
        port: 8000,
    };

    {
        let manager = Manager::file(dir.path());
        let outcome = manager.save("nim", &Key::new("meta/llama"), &entry).await?;
        assert_eq!(outcome, StoreOutcome::Created);

        let bucket = manager.get_or_create_bucket("inference").await?;
        bucket.index_add("all", "a", 1.0).await?;
        bucket.index_add("all", "b", 2.0).await?;
        manager.shutdown();
    }

    let manager = Manager::from_selector(&Selector::File(dir.path().to_path_buf())).await?;
    let loaded: Option<Entry> = manager.load("nim", &Key::new("meta/llama")).await?;
    assert_eq!(loaded, Some(entry));

    let bucket = manager.get_or_create_bucket("inference").await?;
    assert_eq!(bucket.index_range("all", 0, None).await?, vec!["b", "a"]);
    assert_eq!(bucket.index_len("all").await?, 2);

    let nim = manager.get_or_create_bucket("nim").await?;
    let keys = nim.keys().await?;
    assert_eq!(keys, vec![Key::new("meta/llama")]);
    Ok(())
}
