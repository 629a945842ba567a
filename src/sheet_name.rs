//! Sheet Name Module
//!
//! ソース名からワークシート名を導出するモジュール。
//! Excelの制約（31文字以内、`\ / * ? : [ ]`を含まない、大文字小文字を区別せず一意）を
//! 満たす名前を生成します。

use std::collections::HashSet;

use crate::writer::is_xml_char;

/// ワークシート名の最大文字数
pub const MAX_SHEET_NAME_LEN: usize = 31;

/// ワークシート名に使用できない文字
pub const INVALID_SHEET_CHARS: [char; 7] = ['\\', '/', '*', '?', ':', '[', ']'];

/// サニタイズ後に空文字列となった場合の名前
const FALLBACK_NAME: &str = "Sheet";

/// ソース名から拡張子を取り除く
///
/// 最後の`.`以降を取り除きます。パス区切り文字（`/`、`\`）より前にある`.`は
/// 拡張子とみなしません。
///
/// # 使用例
///
/// ```rust
/// use csvbook::strip_extension;
///
/// assert_eq!(strip_extension("jan.csv"), "jan");
/// assert_eq!(strip_extension("archive.tar.gz"), "archive.tar");
/// assert_eq!(strip_extension(".csv"), "");
/// assert_eq!(strip_extension("a/b"), "a/b");
/// ```
pub fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(dot) if !name[dot..].contains(['/', '\\']) => &name[..dot],
        _ => name,
    }
}

/// ワークシート名をサニタイズする
///
/// 1. 使用不可文字とXML 1.0で使用できない文字（制御文字など）を`_`に置換
/// 2. 空文字列の場合は`"Sheet"`
/// 3. 31文字に切り詰め
pub fn sanitize_sheet_name(base: &str) -> String {
    let replaced: String = base
        .chars()
        .map(|c| {
            if INVALID_SHEET_CHARS.contains(&c) || !is_xml_char(c) {
                '_'
            } else {
                c
            }
        })
        .collect();

    if replaced.is_empty() {
        return FALLBACK_NAME.to_string();
    }

    truncate_chars(&replaced, MAX_SHEET_NAME_LEN)
}

/// 文字数単位で切り詰める
fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// ワークブック内で一意なワークシート名を払い出す
///
/// 使用済みの名前を大文字小文字を区別しない集合で管理し、衝突時は`_N`
/// （N = 1, 2, …）を付加します。接尾辞を付けると31文字を超える場合は、
/// ベース名を切り詰めます。
#[derive(Debug, Default)]
pub struct SheetNamer {
    /// 使用済みの名前（小文字化済み）
    used: HashSet<String>,
    /// 拡張子を取り除くかどうか
    keep_extension: bool,
}

impl SheetNamer {
    /// 新しいインスタンスを生成（拡張子を取り除く）
    pub fn new() -> Self {
        Self::default()
    }

    /// 拡張子を取り除かないインスタンスを生成
    pub fn keeping_extension() -> Self {
        Self {
            used: HashSet::new(),
            keep_extension: true,
        }
    }

    /// ソース名から一意なワークシート名を払い出す
    ///
    /// # 使用例
    ///
    /// ```rust
    /// use csvbook::SheetNamer;
    ///
    /// let mut namer = SheetNamer::new();
    /// assert_eq!(namer.assign("jan.csv"), "jan");
    /// assert_eq!(namer.assign("JAN.csv"), "JAN_1");
    /// assert_eq!(namer.assign("a/b"), "a_b");
    /// ```
    pub fn assign(&mut self, source_name: &str) -> String {
        let base = if self.keep_extension {
            source_name
        } else {
            strip_extension(source_name)
        };
        let sanitized = sanitize_sheet_name(base);

        if self.used.insert(sanitized.to_lowercase()) {
            return sanitized;
        }

        let mut n: u32 = 1;
        loop {
            let suffix = format!("_{}", n);
            let room = MAX_SHEET_NAME_LEN - suffix.chars().count();
            let candidate = format!("{}{}", truncate_chars(&sanitized, room), suffix);
            if self.used.insert(candidate.to_lowercase()) {
                return candidate;
            }
            n += 1;
        }
    }

    /// 払い出し済みの名前の数
    pub fn len(&self) -> usize {
        self.used.len()
    }

    /// まだ1つも払い出していないかどうか
    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_strip_extension() {
        assert_eq!(strip_extension("jan.csv"), "jan");
        assert_eq!(strip_extension("report.2024.CSV"), "report.2024");
        assert_eq!(strip_extension("noext"), "noext");
        assert_eq!(strip_extension(".csv"), "");
        assert_eq!(strip_extension("dir.v1/file"), "dir.v1/file");
    }

    #[test]
    fn test_sanitize_replaces_invalid_chars() {
        assert_eq!(sanitize_sheet_name("a/b"), "a_b");
        assert_eq!(sanitize_sheet_name("a\\b"), "a_b");
        assert_eq!(sanitize_sheet_name("q?*:[x]"), "q_____x_");
    }

    #[test]
    fn test_sanitize_replaces_xml_illegal_chars() {
        assert_eq!(sanitize_sheet_name("a\u{1}b\u{0}c\u{FFFE}"), "a_b_c_");
        assert_eq!(sanitize_sheet_name("tab\there"), "tab\there");
    }

    #[test]
    fn test_sanitize_empty_uses_fallback() {
        assert_eq!(sanitize_sheet_name(""), "Sheet");
    }

    #[test]
    fn test_sanitize_truncates_to_31_chars() {
        let long = "abcdefghijklmnopqrstuvwxyz0123456789";
        let name = sanitize_sheet_name(long);
        assert_eq!(name.chars().count(), 31);
        assert_eq!(name, "abcdefghijklmnopqrstuvwxyz01234");
    }

    #[test]
    fn test_sanitize_counts_chars_not_bytes() {
        let name = sanitize_sheet_name(&"売上".repeat(20));
        assert_eq!(name.chars().count(), 31);
    }

    #[test]
    fn test_assign_extension_only_name() {
        let mut namer = SheetNamer::new();
        assert_eq!(namer.assign(".csv"), "Sheet");
        assert_eq!(namer.assign(".csv"), "Sheet_1");
    }

    #[test]
    fn test_assign_duplicate_names() {
        let mut namer = SheetNamer::new();
        assert_eq!(namer.assign("jan.csv"), "jan");
        assert_eq!(namer.assign("jan.csv"), "jan_1");
        assert_eq!(namer.assign("jan.csv"), "jan_2");
        assert_eq!(namer.len(), 3);
    }

    #[test]
    fn test_assign_colliding_after_sanitize() {
        let mut namer = SheetNamer::new();
        assert_eq!(namer.assign("a/b"), "a_b");
        assert_eq!(namer.assign("a\\b"), "a_b_1");
    }

    #[test]
    fn test_assign_is_case_insensitive() {
        let mut namer = SheetNamer::new();
        assert_eq!(namer.assign("Sales.csv"), "Sales");
        assert_eq!(namer.assign("SALES.csv"), "SALES_1");
        assert_eq!(namer.assign("sales_1.csv"), "sales_1_1");
    }

    #[test]
    fn test_assign_truncates_base_for_suffix() {
        let mut namer = SheetNamer::new();
        let base = "x".repeat(31);
        assert_eq!(namer.assign(&base), base);

        let second = namer.assign(&base);
        assert_eq!(second.chars().count(), 31);
        assert_eq!(second, format!("{}_1", "x".repeat(29)));
    }

    #[test]
    fn test_assign_suffix_grows_past_nine() {
        let mut namer = SheetNamer::new();
        let base = "y".repeat(31);
        for _ in 0..11 {
            namer.assign(&base);
        }
        let next = namer.assign(&base);
        assert_eq!(next, format!("{}_11", "y".repeat(28)));
    }

    #[test]
    fn test_keeping_extension() {
        let mut namer = SheetNamer::keeping_extension();
        assert_eq!(namer.assign("jan.csv"), "jan.csv");
    }

    proptest! {
        #[test]
        fn prop_assigned_names_are_valid_and_unique(names in proptest::collection::vec(".{0,40}", 1..20)) {
            let mut namer = SheetNamer::new();
            let mut seen = HashSet::new();
            for name in &names {
                let sheet = namer.assign(name);
                prop_assert!(sheet.chars().count() <= MAX_SHEET_NAME_LEN);
                prop_assert!(!sheet.is_empty());
                prop_assert!(!sheet.contains(&INVALID_SHEET_CHARS[..]));
                prop_assert!(sheet.chars().all(is_xml_char));
                prop_assert!(seen.insert(sheet.to_lowercase()));
            }
        }
    }
}
