//! Plain-text output.

use kbsync_engine::{FolderState, IndexStatus, Sort, TreeRow};
use kbsync_remote::{Resource, ResourceId};

const INDENT: &str = "  ";

fn size(resource: &Resource) -> String {
    match resource.size_bytes {
        Some(bytes) => bytes.to_string(),
        None => "-".to_string(),
    }
}

/// One line per child: kind, size, modification date and name.
pub fn listing(children: &[Resource], sort: Sort) -> String {
    let mut sorted = children.to_vec();
    sorted.sort_by(|a, b| sort.compare(a, b));
    let width = sorted.iter().map(|r| size(r).len()).max().unwrap_or(1);
    sorted
        .iter()
        .map(|resource| {
            let (kind, suffix) = if resource.is_dir() { ('d', "/") } else { ('-', "") };
            format!(
                "{kind} {size:>width$} {date} {name}{suffix}\n",
                size = size(resource),
                date = resource.modified_at.date(),
                name = resource.name(),
            )
        })
        .collect()
}

/// The projected tree, files annotated with their indexing status.
pub fn tree(rows: &[TreeRow], status_of: impl Fn(&ResourceId) -> IndexStatus) -> String {
    rows.iter()
        .map(|row| {
            let indent = INDENT.repeat(row.depth);
            let name = row.resource.name();
            match row.folder_state {
                Some(FolderState::Collapsed) => format!("{indent}+ {name}/\n"),
                Some(FolderState::Expanded) => format!("{indent}- {name}/\n"),
                Some(FolderState::Empty) => format!("{indent}- {name}/ (empty)\n"),
                Some(FolderState::Loading) => format!("{indent}- {name}/ (loading)\n"),
                None => format!("{indent}  {name} [{}]\n", status_of(&row.resource.id)),
            }
        })
        .collect()
}

/// `status  id` pairs, ordered by id.
pub fn statuses(mut entries: Vec<(ResourceId, IndexStatus)>) -> String {
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));
    entries.iter().map(|(id, status)| format!("{:<12} {id}\n", status.to_string())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbsync_engine::SortKey;
    use rstest::rstest;
    use time::OffsetDateTime;

    fn row(resource: Resource, depth: usize, folder_state: Option<FolderState>) -> TreeRow {
        TreeRow {
            resource,
            depth,
            parent_id: None,
            is_expanded: matches!(folder_state, Some(state) if state != FolderState::Collapsed),
            folder_state,
        }
    }

    #[test]
    fn test_tree_indents_and_marks_folders() {
        let rows = [
            row(Resource::directory("docs", "docs", OffsetDateTime::UNIX_EPOCH), 0, Some(FolderState::Expanded)),
            row(Resource::file("docs/a.txt", "docs/a.txt", OffsetDateTime::UNIX_EPOCH), 1, None),
            row(Resource::directory("docs/empty", "docs/empty", OffsetDateTime::UNIX_EPOCH), 1, Some(FolderState::Empty)),
            row(Resource::directory("other", "other", OffsetDateTime::UNIX_EPOCH), 0, Some(FolderState::Collapsed)),
        ];
        let output = tree(&rows, |_| IndexStatus::Indexed);
        assert_eq!(output, "- docs/\n    a.txt [indexed]\n  - empty/ (empty)\n+ other/\n");
    }

    #[rstest]
    #[case(SortKey::Name, false, ["a.txt", "b.txt", "docs"])]
    #[case(SortKey::Size, true, ["docs", "b.txt", "a.txt"])]
    fn test_listing_order(#[case] key: SortKey, #[case] desc: bool, #[case] expected: [&str; 3]) {
        let children = [
            Resource::file("b.txt", "b.txt", OffsetDateTime::UNIX_EPOCH).with_size(200),
            Resource::directory("docs", "docs", OffsetDateTime::UNIX_EPOCH),
            Resource::file("a.txt", "a.txt", OffsetDateTime::UNIX_EPOCH).with_size(5),
        ];
        let output = listing(&children, Sort::new(key, desc));
        let names: Vec<&str> = output
            .lines()
            .filter_map(|line| line.rsplit(' ').next())
            .map(|name| name.trim_end_matches('/'))
            .collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_listing_columns() {
        let children = [Resource::file("a.txt", "a.txt", OffsetDateTime::UNIX_EPOCH).with_size(42)];
        assert_eq!(listing(&children, Sort::default()), "- 42 1970-01-01 a.txt\n");
    }

    #[test]
    fn test_statuses_sorted_by_id() {
        let output = statuses(vec![
            (ResourceId::from("b"), IndexStatus::Timeout),
            (ResourceId::from("a"), IndexStatus::DeIndexing),
        ]);
        assert_eq!(output, "de-indexing  a\ntimeout      b\n");
    }
}
