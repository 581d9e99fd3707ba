//! Working files of a multi-segment / multi-pass run: numbered segment
//! parts, the concat list, and the rate-control pass logs. Everything here
//! is best-effort cleaned after a run; cleanup must never fail the job.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

fn destination_stem(destination: &Path) -> String {
    destination
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string())
}

fn destination_dir(destination: &Path) -> PathBuf {
    destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Intermediate file for segment `index`, next to the destination:
/// `<stem>_part_<index>.<ext>`.
pub fn part_path(destination: &Path, index: usize) -> PathBuf {
    let stem = destination_stem(destination);
    let ext = destination
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| "mp4".to_string());
    destination_dir(destination).join(format!("{}_part_{}.{}", stem, index, ext))
}

/// The concat demuxer list consumed by the final stream-copy run.
pub fn concat_list_path(destination: &Path) -> PathBuf {
    destination_dir(destination).join("concat.txt")
}

/// Prefix handed to the encoder's pass-log option. One prefix per segment
/// index so first and second pass of the same segment share state.
pub fn pass_log_prefix(destination: &Path, segment: usize) -> PathBuf {
    let stem = destination_stem(destination);
    destination_dir(destination).join(format!("{}_2pass_{}", stem, segment))
}

/// Write the concat list. Single quotes in paths are escaped the way the
/// concat demuxer expects (`'` -> `'\''`).
pub fn write_concat_list(list_path: &Path, parts: &[PathBuf]) -> io::Result<()> {
    let mut content = String::new();
    for part in parts {
        let escaped = part.to_string_lossy().replace('\'', "'\\''");
        content.push_str(&format!("file '{}'\n", escaped));
    }
    fs::write(list_path, content)
}

/// Remove the intermediate segment parts. Best effort.
pub fn cleanup_parts(parts: &[PathBuf]) {
    for part in parts {
        let _ = fs::remove_file(part);
    }
}

/// Remove the concat list. Best effort.
pub fn cleanup_concat_list(destination: &Path) {
    let _ = fs::remove_file(concat_list_path(destination));
}

/// Sweep the destination directory for this job's pass-log files. The
/// encoder derives its own suffixes from the prefix, so the match is
/// "starts with our pass-log stem and mentions log".
pub fn cleanup_pass_logs(destination: &Path) {
    let stem = format!("{}_2pass", destination_stem(destination));
    let dir = destination_dir(destination);
    let Ok(entries) = fs::read_dir(&dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(&stem) && name.contains("log") {
            log::debug!(
                target: "clipforge::engine::temp",
                "Removing pass log {}",
                entry.path().display()
            );
            let _ = fs::remove_file(entry.path());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_paths_are_numbered_next_to_the_destination() {
        let dest = Path::new("/videos/out.mp4");
        assert_eq!(part_path(dest, 0), PathBuf::from("/videos/out_part_0.mp4"));
        assert_eq!(part_path(dest, 3), PathBuf::from("/videos/out_part_3.mp4"));
    }

    #[test]
    fn concat_list_lives_in_the_destination_dir() {
        assert_eq!(
            concat_list_path(Path::new("/videos/out.mp4")),
            PathBuf::from("/videos/concat.txt")
        );
    }

    #[test]
    fn pass_log_prefix_carries_the_segment_index() {
        assert_eq!(
            pass_log_prefix(Path::new("/videos/out.mp4"), 1),
            PathBuf::from("/videos/out_2pass_1")
        );
    }

    #[test]
    fn concat_list_escapes_single_quotes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let list = dir.path().join("concat.txt");
        let parts = vec![
            dir.path().join("a_part_0.mp4"),
            dir.path().join("it's_part_1.mp4"),
        ];
        write_concat_list(&list, &parts).expect("write list");
        let content = fs::read_to_string(&list).expect("read list");
        assert!(content.contains(&format!("file '{}'\n", parts[0].display())));
        assert!(content.contains("it'\\''s_part_1.mp4"));
    }

    #[test]
    fn pass_log_sweep_only_touches_matching_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("out.mp4");
        let log0 = dir.path().join("out_2pass_0-0.log");
        let mbtree = dir.path().join("out_2pass_0-0.log.mbtree");
        let unrelated = dir.path().join("catalog.txt");
        for p in [&log0, &mbtree, &unrelated] {
            fs::write(p, b"x").expect("write");
        }

        cleanup_pass_logs(&dest);

        assert!(!log0.exists());
        assert!(!mbtree.exists());
        assert!(unrelated.exists(), "unrelated files must survive the sweep");
    }
}
