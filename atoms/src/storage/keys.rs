//! Object key layout. Keys never embed user-supplied names, only a sanitized
//! extension, so they are collision-free and path-safe.

fn extension(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            let ext: String = ext
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .take(10)
                .collect::<String>()
                .to_ascii_lowercase();
            if ext.is_empty() {
                String::new()
            } else {
                format!(".{}", ext)
            }
        }
        _ => String::new(),
    }
}

pub fn submission_object_key(
    module: &str,
    task_id: &str,
    user_id: &str,
    item_id: &str,
    file_name: &str,
) -> String {
    format!(
        "{}/tasks/{}/users/{}/items/{}/{}{}",
        module,
        task_id,
        user_id,
        item_id,
        uuid::Uuid::new_v4(),
        extension(file_name)
    )
}

pub fn template_object_key(module: &str, task_id: &str, item_id: &str, file_name: &str) -> String {
    format!(
        "{}/tasks/{}/items/{}/template/{}{}",
        module,
        task_id,
        item_id,
        uuid::Uuid::new_v4(),
        extension(file_name)
    )
}
