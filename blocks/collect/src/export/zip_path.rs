//! Path-safe entry names for the export archive.

use std::collections::HashSet;

pub const FALLBACK_STUDENT: &str = "unknown";
pub const FALLBACK_ITEM: &str = "未命名材料项";
pub const FALLBACK_FILE: &str = "file";

const ILLEGAL: [char; 9] = ['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// One path segment with separators, reserved and control characters
/// removed, dot runs collapsed and leading dots stripped. `None` when
/// nothing usable is left.
pub fn sanitize_segment(raw: &str) -> Option<String> {
    let mut cleaned = String::with_capacity(raw.len());
    for c in raw.chars() {
        if ILLEGAL.contains(&c) || c.is_control() {
            continue;
        }
        if c == '.' && cleaned.ends_with('.') {
            continue;
        }
        cleaned.push(c);
    }
    let segment = cleaned.trim().trim_start_matches('.').trim();
    match segment {
        "" | "." | ".." => None,
        s => Some(s.to_string()),
    }
}

/// `<student>/<item>/<file>` where the student segment is `<id>-<name>`.
pub fn build_zip_path(student_id: &str, name: &str, item_title: &str, file_name: &str) -> String {
    let student = [student_id, name]
        .iter()
        .filter_map(|part| sanitize_segment(part))
        .collect::<Vec<_>>()
        .join("-");
    let student = if student.is_empty() {
        FALLBACK_STUDENT.to_string()
    } else {
        student
    };
    let item = sanitize_segment(item_title).unwrap_or_else(|| FALLBACK_ITEM.to_string());
    let file = sanitize_segment(file_name).unwrap_or_else(|| FALLBACK_FILE.to_string());
    format!("{}/{}/{}", student, item, file)
}

/// Returns `path`, or `stem (n).ext` if it is already taken. Records the result.
pub fn dedupe_path(path: String, used: &mut HashSet<String>) -> String {
    if used.insert(path.clone()) {
        return path;
    }
    let (dir, file) = match path.rsplit_once('/') {
        Some((dir, file)) => (format!("{}/", dir), file.to_string()),
        None => (String::new(), path.clone()),
    };
    let (stem, ext) = match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{}", ext)),
        _ => (file.clone(), String::new()),
    };
    let mut n = 2;
    loop {
        let candidate = format!("{}{} ({}){}", dir, stem, n, ext);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Download name of the archive for a task title.
pub fn archive_name(title: &str) -> String {
    format!(
        "{}.zip",
        sanitize_segment(title).unwrap_or_else(|| "export".to_string())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traversal_payloads_are_neutralized() {
        assert_eq!(build_zip_path("../..", "evil", "../x", "../a.zip"), "evil/x/a.zip");
        assert_eq!(
            build_zip_path("..\\..", "..", "....//", "a..b.pdf"),
            "unknown/未命名材料项/a.b.pdf"
        );
    }

    #[test]
    fn test_empty_segments_fall_back() {
        assert_eq!(build_zip_path("", "", "", ""), "unknown/未命名材料项/file");
        assert_eq!(build_zip_path("  ", "\u{0}", ".", ".."), "unknown/未命名材料项/file");
    }

    #[test]
    fn test_student_segment_joins_non_empty_parts() {
        assert_eq!(build_zip_path("2024001", "李雷", "身份证", "front.jpg"), "2024001-李雷/身份证/front.jpg");
        assert_eq!(build_zip_path("", "李雷", "x", "y"), "李雷/x/y");
        assert_eq!(build_zip_path("2024001", "", "x", "y"), "2024001/x/y");
    }

    #[test]
    fn test_never_contains_double_dots() {
        let nasty = ["..", "...", "a/../b", ". .", "..\u{7f}..", "x:..:y", ".hidden", "  ../  "];
        for a in nasty {
            for b in nasty {
                let path = build_zip_path(a, b, a, b);
                assert!(!path.contains(".."), "{} from {:?} {:?}", path, a, b);
                assert!(!path.contains("//"), "{}", path);
                assert_eq!(path.split('/').count(), 3);
            }
        }
    }

    #[test]
    fn test_dedupe_path() {
        let mut used = HashSet::new();
        assert_eq!(dedupe_path("s/i/a.pdf".to_string(), &mut used), "s/i/a.pdf");
        assert_eq!(dedupe_path("s/i/a.pdf".to_string(), &mut used), "s/i/a (2).pdf");
        assert_eq!(dedupe_path("s/i/a.pdf".to_string(), &mut used), "s/i/a (3).pdf");
        assert_eq!(dedupe_path("s/i/file".to_string(), &mut used), "s/i/file");
        assert_eq!(dedupe_path("s/i/file".to_string(), &mut used), "s/i/file (2)");
    }

    #[test]
    fn test_archive_name() {
        assert_eq!(archive_name("2025 奖学金材料"), "2025 奖学金材料.zip");
        assert_eq!(archive_name("a/b"), "ab.zip");
        assert_eq!(archive_name("///"), "export.zip");
    }
}
