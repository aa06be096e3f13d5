//! Named parameters and placeholder handling.
//!
//! SQL text is written with `:name` placeholders. The same name may appear
//! several times; every occurrence becomes a bind position of one
//! [`Parameter`], and binding writes the value to all of them. Before the
//! text reaches a driver it is rewritten into that driver's
//! [`PlaceholderStyle`].

use std::ops::{Deref, DerefMut};

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::buffer::ByteBuffer;
use crate::value::TypedValue;

/// Native placeholder syntax a driver expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// Anonymous `?` markers, one bind position per occurrence.
    Question,
    /// Numbered markers such as `:1` or `$1`, one per occurrence.
    Numbered(char),
    /// Named markers such as `:name`; one position per distinct name.
    Named(char),
}

/// One syntactic `:name` occurrence in SQL text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub name: String,
    /// Byte offset of the leading `:`.
    pub start: usize,
    /// Byte offset just past the name.
    pub end: usize,
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Find every `:name` placeholder, skipping string literals, quoted
/// identifiers, comments and `::` casts.
pub fn scan_placeholders(sql: &str) -> Vec<Placeholder> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == quote {
                        // doubled quote is an escaped quote
                        if bytes.get(i + 1) == Some(&quote) {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 2;
            }
            b':' if bytes.get(i + 1) == Some(&b':') => {
                i += 2;
            }
            b':' => {
                let start = i;
                let mut end = i + 1;
                while end < bytes.len() && is_name_byte(bytes[end]) {
                    end += 1;
                }
                let preceded_by_name = start > 0 && is_name_byte(bytes[start - 1]);
                if end > start + 1 && !preceded_by_name {
                    found.push(Placeholder {
                        name: sql[start + 1..end].to_string(),
                        start,
                        end,
                    });
                }
                i = end;
            }
            _ => i += 1,
        }
    }

    found
}

/// Rewrite `:name` placeholders into the driver's native syntax.
pub fn rewrite_sql(sql: &str, placeholders: &[Placeholder], style: PlaceholderStyle) -> String {
    if placeholders.is_empty() {
        return sql.to_string();
    }
    let mut out = String::with_capacity(sql.len() + placeholders.len() * 2);
    let mut last = 0;
    for (index, ph) in placeholders.iter().enumerate() {
        out.push_str(&sql[last..ph.start]);
        match style {
            PlaceholderStyle::Question => out.push('?'),
            PlaceholderStyle::Numbered(prefix) => {
                out.push(prefix);
                out.push_str(&(index + 1).to_string());
            }
            PlaceholderStyle::Named(prefix) => {
                out.push(prefix);
                out.push_str(&ph.name);
            }
        }
        last = ph.end;
    }
    out.push_str(&sql[last..]);
    out
}

/// A named, positionable value used for binding.
#[derive(Debug, Clone, Default)]
pub struct Parameter {
    name: String,
    value: TypedValue,
    positions: SmallVec<[usize; 4]>,
    output: bool,
    conversion: ByteBuffer,
}

impl Parameter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &TypedValue {
        &self.value
    }

    pub fn set_value(&mut self, value: impl Into<TypedValue>) {
        self.value = value.into();
    }

    /// 1-based native placeholder indices this parameter is bound to.
    pub fn bind_positions(&self) -> &[usize] {
        &self.positions
    }

    pub(crate) fn add_position(&mut self, position: usize) {
        if !self.positions.contains(&position) {
            self.positions.push(position);
        }
    }

    pub(crate) fn clear_positions(&mut self) {
        self.positions.clear();
    }

    /// Stored-procedure OUT/INOUT parameter.
    pub fn is_output(&self) -> bool {
        self.output
    }

    pub fn set_output(&mut self, output: bool) {
        self.output = output;
    }

    /// Driver scratch space for wire formats that differ from the in-memory
    /// layout (packed date structs and the like).
    pub fn conversion_buffer(&mut self) -> &mut ByteBuffer {
        &mut self.conversion
    }
}

impl Deref for Parameter {
    type Target = TypedValue;

    fn deref(&self) -> &TypedValue {
        &self.value
    }
}

impl DerefMut for Parameter {
    fn deref_mut(&mut self) -> &mut TypedValue {
        &mut self.value
    }
}

/// Parameters of one query: unique by name, in order of first appearance.
#[derive(Debug, Clone, Default)]
pub struct ParameterList {
    params: IndexMap<String, Parameter>,
}

impl ParameterList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from placeholder names, keeping values, output flags and
    /// scratch buffers of names that survive.
    pub fn rebuild<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        let mut old = std::mem::take(&mut self.params);
        for name in names {
            if self.params.contains_key(name) {
                continue;
            }
            let mut param = old.swap_remove(name).unwrap_or_else(|| Parameter::new(name));
            param.clear_positions();
            self.params.insert(name.to_string(), param);
        }
    }

    /// Assign bind positions from a textual scan for the given style.
    pub fn assign_positions(&mut self, placeholders: &[Placeholder], style: PlaceholderStyle) {
        for param in self.params.values_mut() {
            param.clear_positions();
        }
        match style {
            PlaceholderStyle::Question | PlaceholderStyle::Numbered(_) => {
                for (index, ph) in placeholders.iter().enumerate() {
                    if let Some(param) = self.params.get_mut(&ph.name) {
                        param.add_position(index + 1);
                    }
                }
            }
            PlaceholderStyle::Named(_) => {
                for (index, param) in self.params.values_mut().enumerate() {
                    param.add_position(index + 1);
                }
            }
        }
    }

    /// Re-derive bind positions from a driver's own placeholder description.
    ///
    /// `native_names[i]` is the name the driver reports for position `i + 1`;
    /// a leading marker character (`:`, `@`, `$`, `?`) is ignored. Names the
    /// textual scan missed are appended.
    pub fn assign_driver_positions(&mut self, native_names: &[String]) {
        for param in self.params.values_mut() {
            param.clear_positions();
        }
        for (index, raw) in native_names.iter().enumerate() {
            let name = raw.trim_start_matches([':', '@', '$', '?']);
            if name.is_empty() {
                continue;
            }
            self.params
                .entry(name.to_string())
                .or_insert_with(|| Parameter::new(name))
                .add_position(index + 1);
        }
    }

    /// Build a list binding `values` to positions `1..=n` under `names`.
    pub fn from_values(names: &[String], values: &[TypedValue]) -> Self {
        let mut list = Self::new();
        for (index, (name, value)) in names.iter().zip(values).enumerate() {
            let mut param = Parameter::new(name.as_str());
            param.value = value.clone();
            param.add_position(index + 1);
            list.params.insert(name.clone(), param);
        }
        list
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.params.get_mut(name)
    }

    /// Parameter bound to a 1-based native position.
    pub fn by_position(&self, position: usize) -> Option<&Parameter> {
        self.params
            .values()
            .find(|p| p.bind_positions().contains(&position))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Parameter> {
        self.params.values_mut()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Highest bind position in use.
    pub fn bind_count(&self) -> usize {
        self.params
            .values()
            .flat_map(|p| p.bind_positions().iter().copied())
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_skips_literals_comments_and_casts() {
        let sql = "SELECT ':skip', \"a:b\", x::int -- :nope\n FROM t /* :no */ WHERE id = :id AND n = :name";
        let names: Vec<_> = scan_placeholders(sql).into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["id", "name"]);
    }

    #[test]
    fn test_scan_escaped_quote() {
        let sql = "SELECT 'it''s :x' , :y";
        let names: Vec<_> = scan_placeholders(sql).into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["y"]);
    }

    #[test]
    fn test_rewrite_styles() {
        let sql = "INSERT INTO t VALUES(:id, :name, :id)";
        let ph = scan_placeholders(sql);
        assert_eq!(
            rewrite_sql(sql, &ph, PlaceholderStyle::Question),
            "INSERT INTO t VALUES(?, ?, ?)"
        );
        assert_eq!(
            rewrite_sql(sql, &ph, PlaceholderStyle::Numbered('$')),
            "INSERT INTO t VALUES($1, $2, $3)"
        );
        assert_eq!(
            rewrite_sql(sql, &ph, PlaceholderStyle::Named('@')),
            "INSERT INTO t VALUES(@id, @name, @id)"
        );
    }

    #[test]
    fn test_repeated_name_gets_every_position() {
        let sql = "SELECT * FROM t WHERE a = :v OR b = :w OR c = :v OR d = :v";
        let ph = scan_placeholders(sql);
        let mut list = ParameterList::new();
        list.rebuild(ph.iter().map(|p| p.name.as_str()));
        list.assign_positions(&ph, PlaceholderStyle::Question);

        assert_eq!(list.len(), 2);
        assert_eq!(list.get("v").unwrap().bind_positions(), &[1, 3, 4]);
        assert_eq!(list.get("w").unwrap().bind_positions(), &[2]);
        assert_eq!(list.bind_count(), 4);
        assert_eq!(list.by_position(3).unwrap().name(), "v");
    }

    #[test]
    fn test_rebuild_preserves_surviving_values() {
        let mut list = ParameterList::new();
        list.rebuild(["a", "b"]);
        list.get_mut("a").unwrap().set_integer(1);
        list.get_mut("b").unwrap().set_string("x");
        list.get_mut("b").unwrap().set_output(true);

        list.rebuild(["c", "b"]);
        let names: Vec<_> = list.names().collect();
        assert_eq!(names, vec!["c", "b"]);
        assert!(list.get("a").is_none());
        assert!(list.get("c").unwrap().is_null());
        assert_eq!(list.get("b").unwrap().as_string(), "x");
        assert!(list.get("b").unwrap().is_output());
    }

    #[test]
    fn test_driver_positions_override_textual() {
        let mut list = ParameterList::new();
        list.rebuild(["id", "name"]);
        list.assign_driver_positions(&[":name".to_string(), ":id".to_string(), "@extra".to_string()]);
        assert_eq!(list.get("name").unwrap().bind_positions(), &[1]);
        assert_eq!(list.get("id").unwrap().bind_positions(), &[2]);
        assert_eq!(list.get("extra").unwrap().bind_positions(), &[3]);
    }

    #[test]
    fn test_named_style_positions_follow_first_appearance() {
        let sql = "SELECT :b, :a, :b";
        let ph = scan_placeholders(sql);
        let mut list = ParameterList::new();
        list.rebuild(ph.iter().map(|p| p.name.as_str()));
        list.assign_positions(&ph, PlaceholderStyle::Named(':'));
        assert_eq!(list.get("b").unwrap().bind_positions(), &[1]);
        assert_eq!(list.get("a").unwrap().bind_positions(), &[2]);
    }
}
