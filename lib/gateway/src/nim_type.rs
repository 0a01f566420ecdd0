// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Kind of inference a NIM serves. Decides which protocol handler it is dispatched to.
///
/// Serializes as its wire name. Strings that name no known kind are kept in
/// [`NimType::Unknown`] so stored records written by other tools still load.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NimType {
    Llm,
    Image,
    ThreeD,
    Asr,
    SpeechEnhancement,
    PaddleOcr,
    Unknown(String),
}

impl NimType {
    pub fn as_str(&self) -> &str {
        match self {
            NimType::Llm => "llm",
            NimType::Image => "image",
            NimType::ThreeD => "3d",
            NimType::Asr => "asr",
            NimType::SpeechEnhancement => "speech_enhancement",
            NimType::PaddleOcr => "paddleocr",
            NimType::Unknown(raw) => raw,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, NimType::Unknown(_))
    }
}

impl FromStr for NimType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "llm" | "chat" => NimType::Llm,
            "image" | "image_generation" => NimType::Image,
            "3d" => NimType::ThreeD,
            "asr" => NimType::Asr,
            "speech_enhancement" => NimType::SpeechEnhancement,
            "paddleocr" | "ocr" => NimType::PaddleOcr,
            _ => NimType::Unknown(s.to_string()),
        })
    }
}

impl From<&str> for NimType {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(t) => t,
            Err(never) => match never {},
        }
    }
}

impl fmt::Display for NimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for NimType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for NimType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(NimType::from(raw.as_str()))
    }
}
