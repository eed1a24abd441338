use std::path::Path;

pub fn map(_filename: &Path, contents: &str) -> Vec<(String, String)> {
    let mut cnt = Vec::new();
    for w in contents.split_whitespace() {
        cnt.push((w.into(), "1".into()));
    }
    cnt
}

pub fn reduce(_key: &str, values: &[String]) -> String {
    values.len().to_string()
}
