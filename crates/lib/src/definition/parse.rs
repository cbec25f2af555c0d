//! Strict conversion of the `INFO` table into a [`PackageDefinition`].

use mlua::prelude::*;

use super::{DefinitionError, PackageDefinition, is_valid_version};
use crate::arch::Arch;

/// Validates `INFO` and converts it.
///
/// `name` is required. Unknown keys, wrongly typed values and unknown
/// architectures are rejected. A missing `arch` means the host architecture.
pub fn parse_info(value: LuaValue) -> Result<PackageDefinition, DefinitionError> {
  let table = match value {
    LuaValue::Table(table) => table,
    LuaValue::Nil => return Err(DefinitionError::MissingInfo),
    other => return Err(DefinitionError::InfoNotTable(other.type_name().to_string())),
  };

  let mut name = None;
  let mut arch = None;
  let mut def = PackageDefinition::new("");

  for pair in table.pairs::<LuaValue, LuaValue>() {
    let (key, value) = pair.map_err(|e| DefinitionError::Malformed(e.to_string()))?;
    let LuaValue::String(key) = key else {
      return Err(DefinitionError::UnknownField(format!("[{}]", key.type_name())));
    };
    let key = key.to_string_lossy().to_string();

    match key.as_str() {
      "name" => name = Some(string_field("name", value)?),
      "description" => def.description = Some(string_field(&key, value)?),
      "url" => def.url = Some(string_field(&key, value)?),
      "license" => def.license = Some(string_field(&key, value)?),
      "version" => def.version = Some(string_field(&key, value)?),
      "dev" => def.dev = bool_field(&key, value)?,
      "maintainers" => def.maintainers = list_field(&key, value)?,
      "provides" => def.provides = list_field(&key, value)?.into_iter().collect(),
      "dependencies" => def.dependencies = list_field(&key, value)?,
      "build_dependencies" => def.build_dependencies = list_field(&key, value)?,
      "optional_dependencies" => def.optional_dependencies = list_field(&key, value)?,
      "conflicts" => def.conflicts = list_field(&key, value)?,
      "replaces" => def.replaces = list_field(&key, value)?,
      "arch" => arch = Some(arch_field(value)?),
      _ => return Err(DefinitionError::UnknownField(key)),
    }
  }

  let name = name.ok_or(DefinitionError::MissingName)?;
  if !is_valid_name(&name) {
    return Err(DefinitionError::InvalidName(name));
  }
  def.name = name;

  if let Some(version) = def.version.as_ref().filter(|v| !is_valid_version(v)) {
    return Err(DefinitionError::InvalidVersion(version.clone()));
  }

  def.arch = match arch {
    Some(arch) => arch,
    None => {
      let host = Arch::current().ok_or_else(|| DefinitionError::UnsupportedHost(std::env::consts::ARCH.to_string()))?;
      vec![host]
    }
  };

  Ok(def)
}

/// Names end up in directory and file names.
fn is_valid_name(name: &str) -> bool {
  !name.is_empty()
    && !name.starts_with(['.', '-'])
    && name
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+'))
}

fn wrong_type(field: &str, expected: &'static str, found: &LuaValue) -> DefinitionError {
  DefinitionError::WrongType {
    field: field.to_string(),
    expected,
    found: found.type_name().to_string(),
  }
}

fn string_field(field: &str, value: LuaValue) -> Result<String, DefinitionError> {
  match &value {
    LuaValue::String(s) => s
      .to_str()
      .map(|s| s.to_string())
      .map_err(|_| wrong_type(field, "a UTF-8 string", &value)),
    _ => Err(wrong_type(field, "a string", &value)),
  }
}

fn bool_field(field: &str, value: LuaValue) -> Result<bool, DefinitionError> {
  match value {
    LuaValue::Boolean(b) => Ok(b),
    other => Err(wrong_type(field, "a boolean", &other)),
  }
}

fn list_field(field: &str, value: LuaValue) -> Result<Vec<String>, DefinitionError> {
  let LuaValue::Table(table) = value else {
    return Err(wrong_type(field, "a list of strings", &value));
  };
  let not_sequence = || DefinitionError::NotASequence { field: field.to_string() };

  let len = table.raw_len();
  let mut count = 0usize;
  for pair in table.pairs::<LuaValue, LuaValue>() {
    pair.map_err(|e| DefinitionError::Malformed(e.to_string()))?;
    count += 1;
  }
  if count != len {
    return Err(not_sequence());
  }

  let mut items = Vec::with_capacity(len);
  for i in 1..=len {
    let item: LuaValue = table.raw_get(i).map_err(|e| DefinitionError::Malformed(e.to_string()))?;
    match item {
      LuaValue::String(s) => items.push(s.to_str().map_err(|_| not_sequence())?.to_string()),
      _ => return Err(not_sequence()),
    }
  }
  Ok(items)
}

fn arch_field(value: LuaValue) -> Result<Vec<Arch>, DefinitionError> {
  let mut arches = Vec::new();
  for raw in list_field("arch", value)? {
    let arch = raw
      .parse::<Arch>()
      .map_err(|e| DefinitionError::UnknownArch(e.to_string()))?;
    if !arches.contains(&arch) {
      arches.push(arch);
    }
  }
  if arches.is_empty() {
    return Err(DefinitionError::NoArch);
  }
  Ok(arches)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(source: &str) -> Result<PackageDefinition, DefinitionError> {
    let lua = Lua::new();
    lua.load(source).exec().unwrap();
    let info: LuaValue = lua.globals().get("INFO").unwrap();
    parse_info(info)
  }

  mod accepted {
    use super::*;

    #[test]
    fn full_definition() {
      let def = parse(
        r#"INFO = {
          name = "zig",
          description = "General-purpose programming language",
          url = "https://ziglang.org",
          license = "MIT",
          maintainers = { "alice", "bob" },
          dev = true,
          provides = { "zig-compiler", "zig" },
          arch = { "x86_64", "aarch64", "x86_64" },
          dependencies = { "glibc" },
          conflicts = { "zig-bin" },
        }"#,
      )
      .unwrap();

      assert_eq!(def.name, "zig");
      assert_eq!(def.license.as_deref(), Some("MIT"));
      assert_eq!(def.maintainers, vec!["alice", "bob"]);
      assert!(def.dev);
      assert_eq!(def.provides.len(), 2);
      assert_eq!(def.arch, vec![Arch::X86_64, Arch::Aarch64]);
      assert_eq!(def.dependencies, vec!["glibc"]);
      assert_eq!(def.conflicts, vec!["zig-bin"]);
      assert_eq!(def.version, None);
    }

    #[test]
    fn missing_arch_means_host() {
      let def = parse(r#"INFO = { name = "tool" }"#).unwrap();
      assert_eq!(def.arch, vec![Arch::current().unwrap()]);
    }

    #[test]
    fn static_version() {
      let def = parse(r#"INFO = { name = "tool", version = "1.2.3" }"#).unwrap();
      assert_eq!(def.version.as_deref(), Some("1.2.3"));
    }
  }

  mod rejected {
    use super::*;

    #[test]
    fn missing_info() {
      assert_eq!(parse("local x = 1").unwrap_err(), DefinitionError::MissingInfo);
    }

    #[test]
    fn missing_name() {
      assert_eq!(
        parse(r#"INFO = { description = "no name" }"#).unwrap_err(),
        DefinitionError::MissingName
      );
    }

    #[test]
    fn non_string_name() {
      let err = parse("INFO = { name = 42 }").unwrap_err();
      assert!(matches!(err, DefinitionError::WrongType { ref field, .. } if field == "name"));
    }

    #[test]
    fn unknown_field() {
      assert_eq!(
        parse(r#"INFO = { name = "x", homepage = "y" }"#).unwrap_err(),
        DefinitionError::UnknownField("homepage".into())
      );
    }

    #[test]
    fn wrong_list_element_type() {
      let err = parse(r#"INFO = { name = "x", maintainers = { "a", 2 } }"#).unwrap_err();
      assert!(matches!(err, DefinitionError::NotASequence { .. }));
    }

    #[test]
    fn map_instead_of_list() {
      let err = parse(r#"INFO = { name = "x", provides = { a = "b" } }"#).unwrap_err();
      assert!(matches!(err, DefinitionError::NotASequence { .. }));
    }

    #[test]
    fn unknown_arch() {
      let err = parse(r#"INFO = { name = "x", arch = { "sparc" } }"#).unwrap_err();
      assert!(matches!(err, DefinitionError::UnknownArch(_)));
    }

    #[test]
    fn empty_arch() {
      assert_eq!(
        parse(r#"INFO = { name = "x", arch = {} }"#).unwrap_err(),
        DefinitionError::NoArch
      );
    }

    #[test]
    fn unsafe_name() {
      for name in ["../evil", "a b", "", ".hidden"] {
        let source = format!("INFO = {{ name = {name:?} }}");
        assert!(parse(&source).is_err(), "{name}");
      }
    }

    #[test]
    fn unsafe_version() {
      for version in ["/../../escaped", "../1.0", ".1", "1 2"] {
        let source = format!("INFO = {{ name = \"tool\", version = {version:?} }}");
        assert_eq!(
          parse(&source).unwrap_err(),
          DefinitionError::InvalidVersion(version.to_string()),
          "{version}"
        );
      }
    }

    #[test]
    fn info_not_a_table() {
      assert_eq!(
        parse(r#"INFO = "zig""#).unwrap_err(),
        DefinitionError::InfoNotTable("string".into())
      );
    }
  }
}
