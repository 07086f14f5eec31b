//! `pgoprof merge`: fold several `.ap` profiles into one.

use clap::Args;
use serde::{Deserialize, Serialize};

use std::path::PathBuf;

use crate::{
    Config, DecodeOptions, PgoError, PgoResult, ProfileMerger, decode, encode,
    find_matching_files, split_input_list, write_atomic,
};

const INPUTS_LONG_HELP: &str = "Accepted forms:\n- a single path: run1.ap\n- a delimited list: run1.ap:run2.ap or run1.ap,run2.ap\n- glob patterns: 'profiles/**/*.ap'\nUnreadable, incompatible or checksum-mismatched inputs are skipped; the merge fails only when none can be used.";

#[derive(Debug, Args)]
pub struct MergeArgs {
    #[arg(
        value_name = "INPUTS",
        required = true,
        help = "Profiles to merge.",
        long_help = INPUTS_LONG_HELP
    )]
    pub inputs: Vec<String>,
    #[arg(long, short = 'o')]
    pub out: PathBuf,
    /// Drop methods observed fewer times than this [default: from config].
    #[arg(long)]
    pub hotness_threshold: Option<u32>,
    #[arg(long, default_value = "overwrite")]
    pub mode: MergeMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Replace the output file.
    Overwrite,
    /// Fold the existing output file in as well.
    Merge,
}

impl clap::ValueEnum for MergeMode {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Overwrite, Self::Merge]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Overwrite => clap::builder::PossibleValue::new("overwrite"),
            Self::Merge => clap::builder::PossibleValue::new("merge"),
        })
    }
}

pub fn merge_command(config: &Config, args: &MergeArgs) -> PgoResult<serde_json::Value> {
    let specs = split_input_list(&args.inputs);
    let paths = find_matching_files(&specs)?;
    if paths.is_empty() {
        return Err(PgoError::InvalidArgument(format!(
            "no input profile matched {}",
            specs.join(", ")
        )));
    }

    let threshold = args
        .hotness_threshold
        .unwrap_or(config.profiler.hotness_threshold);
    let max_poly_count = config.profiler.max_poly_count;
    let mut merger = match args.mode {
        MergeMode::Overwrite => ProfileMerger::new(threshold, max_poly_count),
        MergeMode::Merge => match std::fs::read(&args.out) {
            Ok(bytes) => {
                let base = decode(
                    &bytes,
                    &DecodeOptions {
                        hotness_threshold: 0,
                        max_poly_count,
                        remap: None,
                    },
                )?;
                tracing::info!(out = %args.out.display(), "merging into existing profile");
                ProfileMerger::with_base(base, threshold)?
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                ProfileMerger::new(threshold, max_poly_count)
            }
            Err(err) => return Err(err.into()),
        },
    };

    for path in &paths {
        merger.add_file(path);
    }
    let (info, report) = merger.finish()?;
    let bytes = encode(&info)?;
    write_atomic(&args.out, &bytes)?;
    tracing::info!(
        out = %args.out.display(),
        merged = report.merged,
        skipped = report.skipped,
        "merge finished"
    );

    Ok(serde_json::json!({
        "schemaVersion": "pgoprof.merge.v1",
        "out": args.out.display().to_string(),
        "mode": args.mode,
        "hotnessThreshold": threshold,
        "bytes": bytes.len(),
        "report": report,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConvertArgs, ConvertTarget, PgoInfo, ProfileType, SampleMode, convert_command};

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pgoprof-merge-cmd-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        dir
    }

    fn write_profile(path: &PathBuf, desc: &str, checksum: u32, method_id: u32, count: u32) {
        let mut info = PgoInfo::new(4);
        let abc = info.sample_panda_file(desc, checksum);
        let record = ProfileType::RecordClass { abc_id: abc, id: 1 };
        info.details.record_pool_mut().add(record, "com.app/main");
        for _ in 0..count {
            info.details
                .add_method(record, method_id, "m", None, SampleMode::HotnessMode);
        }
        std::fs::write(path, encode(&info).expect("encode")).expect("write profile");
    }

    fn args(inputs: Vec<String>, out: PathBuf, mode: MergeMode) -> MergeArgs {
        MergeArgs {
            inputs,
            out,
            hotness_threshold: Some(0),
            mode,
        }
    }

    #[test]
    fn merges_a_delimited_list_and_skips_bad_inputs() {
        let dir = temp_dir();
        let a = dir.join("a.ap");
        let b = dir.join("b.ap");
        let bad = dir.join("bad.ap");
        write_profile(&a, "app.abc", 1, 10, 1);
        write_profile(&b, "app.abc", 1, 11, 1);
        std::fs::write(&bad, b"not a profile").expect("write bad");
        let out = dir.join("out/merged.ap");

        let list = format!("{}:{},{}", a.display(), b.display(), bad.display());
        let value = merge_command(&Config::default(), &args(vec![list], out.clone(), MergeMode::Overwrite))
            .expect("merge");
        assert_eq!(value["report"]["merged"], 2);
        assert_eq!(value["report"]["skipped"], 1);

        let merged = decode(&std::fs::read(&out).expect("read out"), &DecodeOptions::default())
            .expect("decode out");
        assert_eq!(merged.method_count(), 2);
    }

    #[test]
    fn fails_when_nothing_merged() {
        let dir = temp_dir();
        let bad = dir.join("bad.ap");
        std::fs::write(&bad, b"junk").expect("write bad");
        let out = dir.join("merged.ap");
        let err = merge_command(
            &Config::default(),
            &args(vec![bad.display().to_string()], out.clone(), MergeMode::Overwrite),
        )
        .expect_err("nothing usable");
        assert!(matches!(err, PgoError::Merge(_)));
        assert!(!out.exists());
    }

    #[test]
    fn merge_mode_keeps_existing_output() {
        let dir = temp_dir();
        let out = dir.join("merged.ap");
        let input = dir.join("new.ap");
        write_profile(&out, "app.abc", 1, 10, 1);
        write_profile(&input, "app.abc", 1, 11, 1);

        merge_command(
            &Config::default(),
            &args(vec![input.display().to_string()], out.clone(), MergeMode::Merge),
        )
        .expect("merge");
        let merged = decode(&std::fs::read(&out).expect("read out"), &DecodeOptions::default())
            .expect("decode out");
        assert_eq!(merged.method_count(), 2);
    }

    fn count_of(path: &PathBuf, method_id: u32) -> u32 {
        let info = decode(&std::fs::read(path).expect("read out"), &DecodeOptions::default())
            .expect("decode out");
        let record = ProfileType::RecordClass { abc_id: 0, id: 1 };
        info.details.method(&record, method_id).expect("method").count
    }

    #[test]
    fn merging_the_output_into_itself_counts_it_once() {
        let dir = temp_dir();
        let out = dir.join("p.ap");
        write_profile(&out, "app.abc", 1, 10, 3);

        let value = merge_command(
            &Config::default(),
            &args(vec![out.display().to_string()], out.clone(), MergeMode::Merge),
        )
        .expect("merge");
        assert_eq!(value["report"]["merged"], 0);
        assert_eq!(value["report"]["inputs"][0]["status"], "duplicate");
        assert_eq!(count_of(&out, 10), 3);
    }

    #[test]
    fn a_converted_copy_is_not_counted_twice() {
        let dir = temp_dir();
        let original = dir.join("a.ap");
        write_profile(&original, "app.abc", 1, 10, 3);
        let text = dir.join("a.txt");
        let copy = dir.join("b.ap");
        for (input, out, to) in [
            (original.clone(), text.clone(), ConvertTarget::Text),
            (text, copy.clone(), ConvertTarget::Binary),
        ] {
            convert_command(
                &Config::default(),
                &ConvertArgs {
                    input,
                    out,
                    to,
                    hotness_threshold: None,
                },
            )
            .expect("convert");
        }

        let out = dir.join("merged.ap");
        let list = format!("{},{}", original.display(), copy.display());
        let value = merge_command(&Config::default(), &args(vec![list], out.clone(), MergeMode::Overwrite))
            .expect("merge");
        assert_eq!(value["report"]["merged"], 1);
        assert_eq!(value["report"]["skipped"], 1);
        assert_eq!(count_of(&out, 10), 3);
    }

    #[test]
    fn hotness_threshold_drops_cold_methods() {
        let dir = temp_dir();
        let input = dir.join("in.ap");
        write_profile(&input, "app.abc", 1, 10, 1);
        let out = dir.join("out.ap");
        let mut a = args(vec![input.display().to_string()], out.clone(), MergeMode::Overwrite);
        a.hotness_threshold = Some(2);
        merge_command(&Config::default(), &a).expect("merge");
        let merged = decode(&std::fs::read(&out).expect("read out"), &DecodeOptions::default())
            .expect("decode out");
        assert_eq!(merged.method_count(), 0);
    }
}
