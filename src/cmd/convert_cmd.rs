//! `pgoprof convert`: binary `.ap` to text and back.

use clap::Args;
use serde::{Deserialize, Serialize};

use std::path::PathBuf;

use crate::{
    Config, DecodeOptions, PgoResult, decode, encode, from_text, to_text, write_atomic,
};

#[derive(Debug, Args)]
pub struct ConvertArgs {
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,
    #[arg(long, short = 'o')]
    pub out: PathBuf,
    #[arg(long)]
    pub to: ConvertTarget,
    /// Only used when reading a binary profile.
    #[arg(long)]
    pub hotness_threshold: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvertTarget {
    Text,
    Binary,
}

impl clap::ValueEnum for ConvertTarget {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Text, Self::Binary]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Text => clap::builder::PossibleValue::new("text"),
            Self::Binary => clap::builder::PossibleValue::new("binary"),
        })
    }
}

pub fn convert_command(config: &Config, args: &ConvertArgs) -> PgoResult<serde_json::Value> {
    let (bytes, methods) = match args.to {
        ConvertTarget::Text => {
            let raw = std::fs::read(&args.input)?;
            let info = decode(
                &raw,
                &DecodeOptions {
                    hotness_threshold: args.hotness_threshold.unwrap_or(0),
                    max_poly_count: config.profiler.max_poly_count,
                    remap: None,
                },
            )?;
            (to_text(&info)?.into_bytes(), info.method_count())
        }
        ConvertTarget::Binary => {
            let text = std::fs::read_to_string(&args.input)?;
            let info = from_text(&text, config.profiler.max_poly_count)?;
            (encode(&info)?, info.method_count())
        }
    };
    write_atomic(&args.out, &bytes)?;
    tracing::info!(
        input = %args.input.display(),
        out = %args.out.display(),
        methods,
        "profile converted"
    );
    Ok(serde_json::json!({
        "schemaVersion": "pgoprof.convert.v1",
        "input": args.input.display().to_string(),
        "out": args.out.display().to_string(),
        "to": args.to,
        "methods": methods,
        "bytes": bytes.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OpType, PgoInfo, ProfileType, SampleMode};

    #[test]
    fn binary_text_binary_keeps_content() {
        let dir = std::env::temp_dir().join(format!("pgoprof-convert-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("mkdir");

        let mut info = PgoInfo::new(4);
        let abc = info.sample_panda_file("app.abc", 0x55);
        let record = ProfileType::RecordClass { abc_id: abc, id: 2 };
        info.details.record_pool_mut().add(record, "com.app/util");
        info.details
            .add_method(record, 3, "helper", Some(0xdead), SampleMode::CallMode);
        info.details.add_type(&record, 3, 12, OpType::DOUBLE);
        let bin = dir.join("in.ap");
        std::fs::write(&bin, encode(&info).expect("encode")).expect("write");

        let text = dir.join("in.txt");
        let value = convert_command(
            &Config::default(),
            &ConvertArgs {
                input: bin.clone(),
                out: text.clone(),
                to: ConvertTarget::Text,
                hotness_threshold: None,
            },
        )
        .expect("to text");
        assert_eq!(value["methods"], 1);
        assert!(std::fs::read_to_string(&text).expect("read text").contains("helper"));

        let back = dir.join("back.ap");
        convert_command(
            &Config::default(),
            &ConvertArgs {
                input: text,
                out: back.clone(),
                to: ConvertTarget::Binary,
                hotness_threshold: None,
            },
        )
        .expect("to binary");
        let decoded = decode(&std::fs::read(&back).expect("read back"), &DecodeOptions::default())
            .expect("decode back");
        assert_eq!(decoded.method_count(), 1);
        let method = decoded
            .details
            .records()
            .flat_map(|(_, methods)| methods.values())
            .next()
            .expect("method");
        assert_eq!(method.name, "helper");
        assert_eq!(method.types.op_types.get(&12), Some(&OpType::DOUBLE));
    }

    #[test]
    fn garbage_input_is_an_error() {
        let dir = std::env::temp_dir().join(format!("pgoprof-convert-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        let input = dir.join("junk.ap");
        std::fs::write(&input, b"PG").expect("write");
        let out = dir.join("out.txt");
        assert!(
            convert_command(
                &Config::default(),
                &ConvertArgs {
                    input,
                    out: out.clone(),
                    to: ConvertTarget::Text,
                    hotness_threshold: None,
                },
            )
            .is_err()
        );
        assert!(!out.exists());
    }
}
