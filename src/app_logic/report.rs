/*
 * Plain-text rendering of command results for stdout: configuration listings,
 * client histories and search hits.
 */
use crate::core::config_store::{ConfigKey, ConfigStore};
use crate::core::history::{GenerationUsage, History};
use crate::core::search::GenerationHits;

fn list_entry(lines: &mut Vec<String>, indent: &str, name: &str, items: &[String], compact: bool, delim: char) {
    if compact {
        lines.push(format!(
            "{indent}{name}='{}'",
            items.join(delim.to_string().as_str())
        ));
    } else {
        lines.push(format!("{indent}{name}:"));
        for item in items {
            lines.push(format!("{indent}    {item}"));
        }
    }
}

pub fn render_globals(store: &ConfigStore, compact: bool) -> Vec<String> {
    let g = store.globals();
    let mut lines = vec![format!("profile='{}'", store.profile())];
    for key in [ConfigKey::Dest, ConfigKey::Ninc, ConfigKey::Email, ConfigKey::Smtp] {
        let value = store.get_global(key).unwrap_or_default();
        match key {
            ConfigKey::Ninc => lines.push(format!("{}={value}", key.name())),
            _ => lines.push(format!("{}='{value}'", key.name())),
        }
    }
    list_entry(&mut lines, "", "includes", &g.includes, compact, ConfigKey::Includes.delimiter());
    list_entry(&mut lines, "", "excludes", &g.excludes, compact, ConfigKey::Excludes.delimiter());
    list_entry(&mut lines, "", "opts", &g.opts, compact, ConfigKey::Opts.delimiter());
    lines
}

pub fn render_client(store: &ConfigStore, client: &str, compact: bool) -> Vec<String> {
    let mut lines = vec![format!("client={client}")];
    let indent = "  ";
    for key in [ConfigKey::Includes, ConfigKey::Excludes, ConfigKey::Opts] {
        let items = store.client_key_list(client, key);
        list_entry(&mut lines, indent, key.name(), &items, compact, key.delimiter());
    }
    lines.push(format!("{indent}ninc={}", store.client_ninc(client)));
    lines.push(format!("{indent}compress={}", store.client_compress(client)));
    lines.push(format!("{indent}address='{}'", store.client_address(client)));
    lines
}

pub fn render_history(client: &str, history: &History, usage: &[Option<GenerationUsage>]) -> Vec<String> {
    history
        .entries()
        .enumerate()
        .map(|(index, name)| {
            let mut line = format!("{client}:{index}: {name}");
            if let Some(Some(u)) = usage.get(index) {
                line.push_str(&format!(
                    " ({} files, {} dirs, {} bytes)",
                    u.files, u.dirs, u.bytes
                ));
            }
            line
        })
        .collect()
}

pub fn render_search(client: &str, results: &[GenerationHits]) -> Vec<String> {
    let mut lines = Vec::new();
    for generation in results {
        lines.push(format!(
            "{client}: '{}' in {}",
            generation.pattern, generation.generation
        ));
        lines.push(format!("basedir={}", generation.basedir.display()));
        for hit in &generation.hits {
            match &hit.details {
                Some(details) => lines.push(format!("    {} {details}", hit.path)),
                None => lines.push(format!("    {}", hit.path)),
            }
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::search::SearchHit;
    use std::path::PathBuf;

    #[test]
    fn test_history_lines_are_indexed_across_slots_and_snapshots() {
        let history = History {
            numbered: vec!["rubac.2024-01-02".into(), "rubac.2024-01-01".into()],
            snapshots: vec!["rubac.snapshot.pre-upgrade".into()],
        };
        let usage = vec![
            None,
            Some(GenerationUsage {
                files: 3,
                dirs: 1,
                bytes: 42,
            }),
        ];

        let lines = render_history("esme", &history, &usage);

        assert_eq!(
            lines,
            vec![
                "esme:0: rubac.2024-01-02".to_string(),
                "esme:1: rubac.2024-01-01 (3 files, 1 dirs, 42 bytes)".to_string(),
                "esme:2: rubac.snapshot.pre-upgrade".to_string(),
            ]
        );
    }

    #[test]
    fn test_search_reports_basedir_once_per_generation() {
        let results = vec![GenerationHits {
            pattern: ".bashrc$".into(),
            generation: "rubac.2024-01-01".into(),
            basedir: PathBuf::from("/backup/rubac/esme/rubac.2024-01-01"),
            hits: vec![
                SearchHit {
                    path: "/home/steeve/.bashrc".into(),
                    details: None,
                },
                SearchHit {
                    path: "/root/.bashrc".into(),
                    details: None,
                },
            ],
        }];

        let lines = render_search("esme", &results);

        assert_eq!(lines.iter().filter(|l| l.starts_with("basedir=")).count(), 1);
        assert_eq!(lines.last().unwrap(), "    /root/.bashrc");
    }
}
