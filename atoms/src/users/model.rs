use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Directory view of a portal user, as needed by review and export.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    /// Student number shown as 学号 in manifests.
    pub student_no: String,
    pub user_name: String,
    #[serde(default)]
    pub department_ids: Vec<String>,
    #[serde(default)]
    pub role_ids: Vec<String>,
    #[serde(default)]
    pub position_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Department {
    pub department_id: String,
    pub name: String,
    pub parent_id: Option<String>,
}

/// `root` plus every department below it.
pub fn department_closure(departments: &[Department], root: &str) -> HashSet<String> {
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for dept in departments {
        if let Some(parent) = dept.parent_id.as_deref() {
            children.entry(parent).or_default().push(dept.department_id.as_str());
        }
    }

    let mut closure = HashSet::new();
    let mut stack = vec![root];
    while let Some(current) = stack.pop() {
        // Guards against cycles in hand-edited trees.
        if !closure.insert(current.to_string()) {
            continue;
        }
        if let Some(kids) = children.get(current) {
            stack.extend(kids.iter().copied());
        }
    }
    closure
}
