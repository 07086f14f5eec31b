//! `pgoprof dump`: show what a `.ap` profile contains.

use clap::Args;

use std::path::PathBuf;

use crate::{Config, DecodeOptions, PgoResult, ProfileDecoder, RwSlot};

#[derive(Debug, Args)]
pub struct DumpArgs {
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,
    #[arg(long)]
    pub hotness_threshold: Option<u32>,
    /// Only print header, module and count summaries.
    #[arg(long)]
    pub summary: bool,
}

pub fn dump_command(config: &Config, args: &DumpArgs) -> PgoResult<serde_json::Value> {
    let bytes = std::fs::read(&args.input)?;
    let decoder = ProfileDecoder::new(&bytes)?;
    let header = decoder.header().clone();
    let info = decoder.decode(&DecodeOptions {
        hotness_threshold: args.hotness_threshold.unwrap_or(0),
        max_poly_count: config.profiler.max_poly_count,
        remap: None,
    })?;

    let modules = info
        .panda_files
        .iter()
        .map(|f| {
            serde_json::json!({
                "abcId": f.abc_id,
                "desc": f.desc,
                "checksum": format!("{:08x}", f.checksum),
            })
        })
        .collect::<Vec<_>>();

    let mut out = serde_json::Map::new();
    out.insert("schemaVersion".to_string(), serde_json::json!("pgoprof.dump.v1"));
    out.insert(
        "input".to_string(),
        serde_json::json!(args.input.display().to_string()),
    );
    out.insert("version".to_string(), serde_json::json!(header.version.to_string()));
    out.insert(
        "features".to_string(),
        serde_json::json!(format!("{:#x}", header.features.bits())),
    );
    out.insert("modules".to_string(), serde_json::json!(modules));
    out.insert("records".to_string(), serde_json::json!(info.details.record_count()));
    out.insert("methods".to_string(), serde_json::json!(info.method_count()));
    out.insert(
        "lineageTrees".to_string(),
        serde_json::json!(info.details.layouts().len()),
    );
    out.insert(
        "protoTransitions".to_string(),
        serde_json::json!(info.details.proto_transitions().len()),
    );
    if args.summary {
        return Ok(serde_json::Value::Object(out));
    }

    let pool = info.details.record_pool();
    let records = info
        .details
        .records()
        .map(|(record, methods)| {
            let methods = methods
                .values()
                .map(|m| {
                    let rw = m
                        .types
                        .rw_slots
                        .iter()
                        .map(|(offset, slot)| {
                            let value = match slot {
                                RwSlot::Mega => serde_json::json!("mega"),
                                RwSlot::Poly(infos) => serde_json::json!(
                                    infos
                                        .iter()
                                        .map(|i| format!("{}@{}", i.receiver, i.receiver_root))
                                        .collect::<Vec<_>>()
                                ),
                            };
                            (offset.to_string(), value)
                        })
                        .collect::<serde_json::Map<_, _>>();
                    serde_json::json!({
                        "id": m.method_id,
                        "name": m.name,
                        "count": m.count,
                        "mode": m.mode.as_str(),
                        "checksum": m.checksum.map(|c| format!("{c:08x}")),
                        "opTypes": m.types.op_types.iter().map(|(o, t)| (o.to_string(), serde_json::json!(t.bits()))).collect::<serde_json::Map<_, _>>(),
                        "callTargets": m.types.call_targets.iter().map(|(o, t)| (o.to_string(), serde_json::json!(t.to_string()))).collect::<serde_json::Map<_, _>>(),
                        "defines": m.types.defines.iter().map(|(o, d)| (o.to_string(), serde_json::json!(d.profile_type.to_string()))).collect::<serde_json::Map<_, _>>(),
                        "readWrite": rw,
                    })
                })
                .collect::<Vec<_>>();
            serde_json::json!({
                "record": record.to_string(),
                "name": pool.name(record),
                "methods": methods,
            })
        })
        .collect::<Vec<_>>();
    out.insert("recordTable".to_string(), serde_json::json!(records));
    Ok(serde_json::Value::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PgoInfo, ProfileType, SampleMode, encode};

    #[test]
    fn dump_lists_records_and_methods() {
        let dir = std::env::temp_dir().join(format!("pgoprof-dump-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        let mut info = PgoInfo::new(4);
        let abc = info.sample_panda_file("app.abc", 0x77);
        let record = ProfileType::RecordClass { abc_id: abc, id: 1 };
        info.details.record_pool_mut().add(record, "com.app/main");
        info.details
            .add_method(record, 9, "main", Some(0xbeef), SampleMode::HotnessMode);
        info.details.add_object_info_mega(&record, 9, 4);
        let path = dir.join("p.ap");
        std::fs::write(&path, encode(&info).expect("encode")).expect("write");

        let value = dump_command(
            &Config::default(),
            &DumpArgs {
                input: path.clone(),
                hotness_threshold: None,
                summary: false,
            },
        )
        .expect("dump");
        assert_eq!(value["methods"], 1);
        assert_eq!(value["modules"][0]["desc"], "app.abc");
        let method = &value["recordTable"][0]["methods"][0];
        assert_eq!(method["name"], "main");
        assert_eq!(method["checksum"], "0000beef");
        assert_eq!(method["readWrite"]["4"], "mega");
        assert_eq!(value["recordTable"][0]["name"], "com.app/main");

        let summary = dump_command(
            &Config::default(),
            &DumpArgs {
                input: path,
                hotness_threshold: None,
                summary: true,
            },
        )
        .expect("summary");
        assert!(summary.get("recordTable").is_none());
    }
}
