pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Keep `[A-Za-z0-9_-]`, map everything else to `_`.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned
    }
}

pub fn scene_file_name(project: &str, scene_id: &str, extension: &str) -> String {
    format!(
        "{}_{}.{}",
        sanitize_name(project),
        sanitize_name(scene_id),
        extension
    )
}

pub fn combined_file_name(project: &str, extension: &str) -> String {
    format!("{}_combined.{}", sanitize_name(project), extension)
}

pub fn metadata_file_name(project: &str) -> String {
    format!("{}_metadata.json", sanitize_name(project))
}

/// First `max` chars of `text` on one line, for log previews.
pub fn preview(text: &str, max: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max).collect();
        format!("{}...", cut)
    }
}
