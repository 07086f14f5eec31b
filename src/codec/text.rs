//! Line-oriented text rendering of a profile, for diffing and debugging.
//!
//! ```text
//! #pgoprof-text 1.2.0
//! abc:[0,1a2b3c4d,app.abc]
//! pool:[record(0.1),com.app/entry]
//! layout:[class(0.3.r),none]
//! node:[class(0.3.r),class(0.3.77),x=int]
//! proto:[<ihc>,<base root>,<base>,<transition>,<transition proto>]
//! record(0.1):[
//! 40/3/HOTNESS_MODE/0000feed/main:[10,op,00000001|12,call,method(0.7)]
//! ]
//! ```
//!
//! Free text (module names, record and method names, field keys) is
//! percent-escaped so the separators stay unambiguous.

use std::fmt::Write as _;
use std::str::FromStr;

use super::ApVersion;
use crate::{
    DefineOpType, ElementsTrack, FieldDesc, FieldRep, LayoutNode, MethodRecord, MethodTypeSet,
    ObjectInfo, OpType, PandaFileInfo, PgoError, PgoInfo, PgoResult, ProfileType,
    ProtoTransitionType, RwSlot, SampleMode, ShapeTree,
};

const HEADER: &str = "#pgoprof-text";
const BLOCK_START: &str = ":[";
const ARRAY_END: char = ']';
const ELEMENT_SEPARATOR: char = '/';
const BLOCK_SEPARATOR: char = ',';
const TYPE_SEPARATOR: char = '|';
const FIELD_SEPARATOR: char = ';';
const INFO_SEPARATOR: char = '+';
const CHAIN_SEPARATOR: char = '~';
const CHECKSUM_NONE: &str = "--------";

pub fn to_text(info: &PgoInfo) -> PgoResult<String> {
    let mut out = String::new();
    line(&mut out, format_args!("{HEADER} {}", ApVersion::CURRENT));
    for file in info.panda_files.iter() {
        line(
            &mut out,
            format_args!("abc{BLOCK_START}{},{:08x},{}]", file.abc_id, file.checksum, escape(&file.desc)),
        );
    }
    for (record, name) in info.details.record_pool().iter() {
        line(&mut out, format_args!("pool{BLOCK_START}{record},{}]", escape(name)));
    }
    for tree in info.details.layouts().iter() {
        line(&mut out, format_args!("layout{BLOCK_START}{},{}]", tree.root, tree.proto));
        for (shape, node) in &tree.nodes {
            let children = join(node.children.iter().map(ToString::to_string), FIELD_SEPARATOR);
            let fields = join(
                node.fields
                    .iter()
                    .map(|f| format!("{}={}", escape(&f.key), rep_name(f.rep))),
                FIELD_SEPARATOR,
            );
            line(&mut out, format_args!("node{BLOCK_START}{shape},{children},{fields}]"));
        }
    }
    for entry in info.details.proto_transitions().iter() {
        let types = join(entry.types().iter().map(ToString::to_string), BLOCK_SEPARATOR);
        line(&mut out, format_args!("proto{BLOCK_START}{types}]"));
    }
    for (record, methods) in info.details.records() {
        line(&mut out, format_args!("{record}{BLOCK_START}"));
        for method in methods.values() {
            let checksum = method
                .checksum
                .map(|c| format!("{c:08x}"))
                .unwrap_or_else(|| CHECKSUM_NONE.to_string());
            line(
                &mut out,
                format_args!(
                    "{}/{}/{}/{checksum}/{}{BLOCK_START}{}]",
                    method.method_id,
                    method.count,
                    method.mode.as_str(),
                    escape(&method.name),
                    items_to_text(&method.types),
                ),
            );
        }
        line(&mut out, format_args!("{ARRAY_END}"));
    }
    Ok(out)
}

fn line(out: &mut String, args: std::fmt::Arguments<'_>) {
    let _ = out.write_fmt(args);
    out.push('\n');
}

fn join(items: impl Iterator<Item = String>, sep: char) -> String {
    let mut out = String::new();
    for (i, item) in items.enumerate() {
        if i > 0 {
            out.push(sep);
        }
        out.push_str(&item);
    }
    out
}

fn items_to_text(types: &MethodTypeSet) -> String {
    let mut items = Vec::with_capacity(types.len());
    for (offset, op) in &types.op_types {
        items.push(format!("{offset},op,{:08x}", op.bits()));
    }
    for (offset, target) in &types.call_targets {
        items.push(format!("{offset},call,{target}"));
    }
    for (offset, define) in &types.defines {
        let mut payload = format!("{};{};{}", define.profile_type, define.ctor, define.prototype);
        if let Some(track) = define.elements {
            let _ = write!(payload, ";{};{};{}", track.elements_kind, track.length, track.space_flag);
        }
        items.push(format!("{offset},define,{payload}"));
    }
    for (offset, slot) in &types.rw_slots {
        let payload = match slot {
            RwSlot::Mega => "mega".to_string(),
            RwSlot::Poly(infos) => join(infos.iter().map(object_info_to_text), INFO_SEPARATOR),
        };
        items.push(format!("{offset},rw,{payload}"));
    }
    join(items.into_iter(), TYPE_SEPARATOR)
}

fn object_info_to_text(info: &ObjectInfo) -> String {
    let mut out = join(info.key().iter().map(ToString::to_string), FIELD_SEPARATOR);
    for (root, shape) in &info.proto_chain {
        let _ = write!(out, "{CHAIN_SEPARATOR}{root}>{shape}");
    }
    out
}

fn rep_name(rep: FieldRep) -> &'static str {
    match rep {
        FieldRep::None => "none",
        FieldRep::Int => "int",
        FieldRep::Double => "double",
        FieldRep::Tagged => "tagged",
    }
}

fn parse_rep(s: &str) -> Option<FieldRep> {
    Some(match s {
        "none" => FieldRep::None,
        "int" => FieldRep::Int,
        "double" => FieldRep::Double,
        "tagged" => FieldRep::Tagged,
        _ => return None,
    })
}

const ESCAPED: &[char] = &['%', ',', ';', '/', ':', '[', ']', '|', '=', '\n', '\r'];

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if ESCAPED.contains(&c) {
            let _ = write!(out, "%{:02X}", c as u32);
        } else {
            out.push(c);
        }
    }
    out
}

fn unescape(s: &str) -> Option<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '%' {
            let hex: String = chars.by_ref().take(2).collect();
            let code = u8::from_str_radix(&hex, 16).ok()?;
            out.push(char::from(code));
        } else {
            out.push(c);
        }
    }
    Some(out)
}

/// Parses the text rendering back into a profile.
pub fn from_text(text: &str, max_poly_count: usize) -> PgoResult<PgoInfo> {
    let mut info = PgoInfo::new(max_poly_count);
    let mut record: Option<ProfileType> = None;
    let mut tree: Option<ShapeTree> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let err = |reason: String| PgoError::text(line_no, reason);
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(version) = line.strip_prefix(HEADER) {
            let found = parse_version(version.trim()).ok_or_else(|| err(format!("bad version {version:?}")))?;
            if !found.is_compatible() {
                return Err(PgoError::IncompatibleVersion {
                    found,
                    supported: ApVersion::CURRENT,
                });
            }
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        if let Some(current) = record {
            if line == "]" {
                record = None;
                continue;
            }
            let method = parse_method(line, max_poly_count).map_err(err)?;
            info.details.insert_method(current, method);
            continue;
        }

        if let Some(body) = block(line, "abc") {
            let mut parts = body.splitn(3, BLOCK_SEPARATOR);
            let abc_id = next_parsed::<u32>(&mut parts, "abc id").map_err(err)?;
            let checksum = parts
                .next()
                .and_then(|c| u32::from_str_radix(c, 16).ok())
                .ok_or_else(|| err("bad checksum".to_string()))?;
            let desc = parts.next().and_then(unescape).ok_or_else(|| err("bad module name".to_string()))?;
            info.panda_files.insert(PandaFileInfo { abc_id, checksum, desc });
        } else if let Some(body) = block(line, "pool") {
            let (record, name) = body
                .split_once(BLOCK_SEPARATOR)
                .ok_or_else(|| err("record pool entry needs a name".to_string()))?;
            let record = parse_type(record).map_err(err)?;
            let name = unescape(name).ok_or_else(|| err("bad record name".to_string()))?;
            info.details.record_pool_mut().add(record, name);
        } else if let Some(body) = block(line, "layout") {
            if let Some(done) = tree.take() {
                info.details.layouts_mut().insert_tree(done);
            }
            let (root, proto) = body
                .split_once(BLOCK_SEPARATOR)
                .ok_or_else(|| err("layout needs root and proto".to_string()))?;
            let root = parse_type(root).map_err(err)?;
            if !root.is_root() {
                return Err(err(format!("layout keyed by non-root {root}")));
            }
            tree = Some(ShapeTree {
                root,
                proto: parse_type(proto).map_err(err)?,
                nodes: Default::default(),
            });
        } else if let Some(body) = block(line, "node") {
            let current = tree
                .as_mut()
                .ok_or_else(|| err("node outside of a layout".to_string()))?;
            let (shape, node) = parse_node(body).map_err(err)?;
            current.nodes.insert(shape, node);
        } else if let Some(body) = block(line, "proto") {
            let types = body
                .split(BLOCK_SEPARATOR)
                .map(parse_type)
                .collect::<Result<Vec<_>, _>>()
                .map_err(err)?;
            let [ihc, base_root, base, transition, transition_proto] = types[..] else {
                return Err(err(format!("proto transition needs 5 types, got {}", types.len())));
            };
            info.details.proto_transitions_mut().add(ProtoTransitionType {
                ihc,
                base_root,
                base,
                transition,
                transition_proto,
            });
        } else if let Some(head) = line.strip_suffix(BLOCK_START) {
            record = Some(parse_type(head).map_err(err)?);
        } else {
            return Err(err(format!("unrecognized line {line:?}")));
        }
    }

    if let Some(done) = tree {
        info.details.layouts_mut().insert_tree(done);
    }
    if record.is_some() {
        return Err(PgoError::text(text.lines().count(), "unterminated record block"));
    }
    Ok(info)
}

fn block<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    line.strip_prefix(name)?
        .strip_prefix(BLOCK_START)?
        .strip_suffix(ARRAY_END)
}

fn parse_version(s: &str) -> Option<ApVersion> {
    let mut parts = s.split('.').map(|p| p.parse::<u8>().ok());
    Some(ApVersion {
        major: parts.next()??,
        minor: parts.next()??,
        patch: parts.next()??,
    })
}

fn parse_type(s: &str) -> Result<ProfileType, String> {
    ProfileType::from_str(s)
}

fn next_parsed<'a, T: FromStr>(parts: &mut impl Iterator<Item = &'a str>, what: &str) -> Result<T, String> {
    parts
        .next()
        .and_then(|p| p.trim().parse::<T>().ok())
        .ok_or_else(|| format!("invalid {what}"))
}

fn parse_node(body: &str) -> Result<(ProfileType, LayoutNode), String> {
    let mut parts = body.splitn(3, BLOCK_SEPARATOR);
    let shape = parse_type(parts.next().unwrap_or_default())?;
    let mut node = LayoutNode::default();
    for child in parts.next().unwrap_or_default().split(FIELD_SEPARATOR).filter(|c| !c.is_empty()) {
        node.children.insert(parse_type(child)?);
    }
    for field in parts.next().unwrap_or_default().split(FIELD_SEPARATOR).filter(|f| !f.is_empty()) {
        let (key, rep) = field
            .split_once('=')
            .ok_or_else(|| format!("field {field:?} needs a representation"))?;
        node.fields.push(FieldDesc {
            key: unescape(key).ok_or_else(|| format!("bad field key {key:?}"))?,
            rep: parse_rep(rep).ok_or_else(|| format!("bad field representation {rep:?}"))?,
        });
    }
    Ok((shape, node))
}

fn parse_method(line: &str, max_poly: usize) -> Result<MethodRecord, String> {
    let open = line
        .rfind(BLOCK_START)
        .ok_or_else(|| "method line needs a sample block".to_string())?;
    let head = &line[..open];
    let items = line[open + BLOCK_START.len()..]
        .strip_suffix(ARRAY_END)
        .ok_or_else(|| "unterminated sample block".to_string())?;

    let mut parts = head.splitn(5, ELEMENT_SEPARATOR);
    let method_id = next_parsed::<u32>(&mut parts, "method id")?;
    let count = next_parsed::<u32>(&mut parts, "count")?;
    let mode = parts
        .next()
        .and_then(SampleMode::parse)
        .ok_or_else(|| "invalid sample mode".to_string())?;
    let checksum = match parts.next() {
        Some(CHECKSUM_NONE) => None,
        Some(hex) => Some(u32::from_str_radix(hex, 16).map_err(|_| format!("invalid checksum {hex:?}"))?),
        None => return Err("missing checksum".to_string()),
    };
    let name = parts
        .next()
        .and_then(unescape)
        .ok_or_else(|| "missing method name".to_string())?;

    let mut types = MethodTypeSet::default();
    for item in items.split(TYPE_SEPARATOR).filter(|i| !i.is_empty()) {
        parse_item(item, &mut types, max_poly)?;
    }
    Ok(MethodRecord {
        method_id,
        count,
        mode,
        name,
        checksum,
        types,
    })
}

fn parse_item(item: &str, types: &mut MethodTypeSet, max_poly: usize) -> Result<(), String> {
    let mut parts = item.splitn(3, BLOCK_SEPARATOR);
    let offset = next_parsed::<u32>(&mut parts, "sample offset")?;
    let category = parts.next().unwrap_or_default();
    let payload = parts.next().unwrap_or_default();
    match category {
        "op" => {
            let bits = u32::from_str_radix(payload, 16).map_err(|_| format!("invalid op type {payload:?}"))?;
            types.add_op_type(offset, OpType::from_bits(bits));
        }
        "call" => types.add_call_target(offset, parse_type(payload)?),
        "define" => {
            let fields: Vec<&str> = payload.split(FIELD_SEPARATOR).collect();
            let (profile_type, ctor, prototype, track) = match fields[..] {
                [p, c, pr] => (p, c, pr, None),
                [p, c, pr, kind, len, space] => (p, c, pr, Some((kind, len, space))),
                _ => return Err(format!("invalid define {payload:?}")),
            };
            let mut define = DefineOpType::new(parse_type(profile_type)?)
                .with_class_parts(parse_type(ctor)?, parse_type(prototype)?);
            if let Some((kind, len, space)) = track {
                let bad = || format!("invalid elements track in {payload:?}");
                define = define.with_elements(ElementsTrack {
                    elements_kind: kind.parse().map_err(|_| bad())?,
                    length: len.parse().map_err(|_| bad())?,
                    space_flag: space.parse().map_err(|_| bad())?,
                });
            }
            types.add_define(offset, define);
        }
        "rw" if payload == "mega" => types.add_object_info_mega(offset),
        "rw" => {
            let mut slot = RwSlot::default();
            for info in payload.split(INFO_SEPARATOR).filter(|i| !i.is_empty()) {
                slot.insert(parse_object_info(info)?, max_poly);
            }
            types.rw_slots.insert(offset, slot);
        }
        other => return Err(format!("unknown sample category {other:?}")),
    }
    Ok(())
}

fn parse_object_info(s: &str) -> Result<ObjectInfo, String> {
    let mut segments = s.split(CHAIN_SEPARATOR);
    let key = segments
        .next()
        .unwrap_or_default()
        .split(FIELD_SEPARATOR)
        .map(parse_type)
        .collect::<Result<Vec<_>, _>>()?;
    let [receiver_root, receiver, holder_root, holder, holder_tra_root, holder_tra, accessor] = key[..] else {
        return Err(format!("object info needs 7 types, got {}", key.len()));
    };
    let mut proto_chain = Vec::new();
    for link in segments {
        let (root, shape) = link
            .split_once('>')
            .ok_or_else(|| format!("invalid prototype link {link:?}"))?;
        proto_chain.push((parse_type(root)?, parse_type(shape)?));
    }
    Ok(ObjectInfo {
        receiver_root,
        receiver,
        holder_root,
        holder,
        holder_tra_root,
        holder_tra,
        accessor,
        proto_chain,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProfileTypeKind;

    #[test]
    fn escape_round_trips_separators() {
        let name = "a/b:[c]|d,e;f=g%h\n";
        let escaped = escape(name);
        assert!(!escaped.contains(['/', ':', '[', ']', '|', ',', ';', '=', '\n']));
        assert_eq!(unescape(&escaped).as_deref(), Some(name));
    }

    #[test]
    fn method_line_parses_every_category() {
        let class = ProfileType::root(ProfileTypeKind::Class, 0, 3);
        let line = format!(
            "40/3/HOTNESS_MODE/0000feed/ma%2Fin:[10,op,00000001|12,call,method(0.7)|14,define,{class};none;none;4;10;1|16,rw,mega|18,rw,{class};{class};{class};{class};{class};{class};none~{class}>{class}]"
        );
        let method = parse_method(&line, 4).expect("method");
        assert_eq!(method.name, "ma/in");
        assert_eq!(method.checksum, Some(0xfeed));
        assert_eq!(method.types.len(), 5);
        assert_eq!(method.types.defines[&14].elements.map(|e| e.length), Some(10));
        assert_eq!(method.types.rw_slots[&18].infos()[0].proto_chain.len(), 1);
    }

    #[test]
    fn errors_carry_line_numbers() {
        let text = "#pgoprof-text 1.2.0\nabc:[0,zz,a.abc]\n";
        let err = from_text(text, 4).expect_err("bad checksum");
        assert!(matches!(err, PgoError::Text { line: 2, .. }));
    }

    #[test]
    fn unterminated_record_is_rejected() {
        let text = "record(0.1):[\n1/1/CALL_MODE/--------/f:[]\n";
        assert!(from_text(text, 4).is_err());
    }
}
