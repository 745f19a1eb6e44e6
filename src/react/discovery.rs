//! 时间窗口数据文件发现
//!
//! 从故障描述中提取 `YYYY-MM-DDTHH:MM:SSZ` 时间窗口，列出 `<base>/processed_data/<date>/` 下的
//! 日志 / 调用链 / 指标文件，结果作为 `<available_data>` 段落写入任务提示词。
//! 任何失败都降级为提示文本，不会中断案例。

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

/// 数据文件扩展名
const DATA_EXTENSIONS: &[&str] = &["jsonl", "json", "csv", "parquet"];
/// 每个指标分组展示的文件数
const FILES_PER_METRIC_GROUP: usize = 3;

const LOG_DIR: &str = "log-parquet";
const TRACE_DIR: &str = "trace-parquet";
/// (目录名, 展示名)
const METRIC_GROUPS: &[(&str, &str)] = &[
    ("apm", "APM Metrics"),
    ("pod", "Pod Metrics"),
    ("service", "Service Metrics"),
    ("infra_node", "Infrastructure Node"),
    ("infra_pod", "Infrastructure Pod"),
    ("infra_tidb", "Infrastructure TiDB"),
    ("other", "Other Metrics"),
];

const NO_TIME_HINT: &str = "Unable to extract time information from the description. \
     Use preview_table to explore the data directory manually.";
const NO_DATA_HINT: &str = "No monitoring data found.";

fn timestamp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}Z").unwrap())
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{4}-\d{2}-\d{2}").unwrap())
}

/// 文件发现器：只持有数据根目录与展示行数
#[derive(Debug, Clone)]
pub struct FileDiscovery {
    base_path: PathBuf,
    preview_rows: usize,
}

impl FileDiscovery {
    pub fn new(base_path: impl Into<PathBuf>, preview_rows: usize) -> Self {
        Self {
            base_path: base_path.into(),
            preview_rows: preview_rows.max(1),
        }
    }

    fn processed_dir(&self) -> PathBuf {
        self.base_path.join("processed_data")
    }

    /// 生成 `<available_data>` 段落文本
    pub fn discover(&self, description: &str) -> String {
        let times: Vec<&str> = timestamp_re()
            .find_iter(description)
            .map(|m| m.as_str())
            .collect();

        if times.len() >= 2 {
            let (start, end) = (times[0], times[1]);
            tracing::info!(target: "triage::diagnosis", start, end, "time window extracted");
            return self.discover_window(start, end);
        }

        if let Some(date) = date_re().find(description).map(|m| m.as_str()) {
            tracing::info!(target: "triage::diagnosis", date, "date extracted");
            return self.discover_date(date);
        }

        tracing::warn!(target: "triage::diagnosis", "no time window in description");
        NO_TIME_HINT.to_string()
    }

    fn discover_window(&self, start: &str, end: &str) -> String {
        let start_date = &start[..10];
        let dir = self.processed_dir().join(start_date);
        if !dir.is_dir() {
            let available = self.available_dates();
            let Some(best) = closest_date(start_date, &available) else {
                return NO_DATA_HINT.to_string();
            };
            tracing::warn!(
                target: "triage::diagnosis",
                target_date = start_date,
                using = %best,
                "target date has no data, using closest available date"
            );
            return format!(
                "Time data mismatch corrected automatically\n\
                 Target date: {start_date} (no data)\n\
                 Adjusted to: {best} (closest available date)\n\
                 Adjusted time window: {} to {}\n\n\
                 Analysis suggestions:\n\
                 1. Use the adjusted time window for analysis\n\
                 2. Timestamps in files match folder dates (UTC)\n\
                 3. Focus on fault patterns rather than exact time points\n\n\
                 Available dates: {}\n\
                 Recommended data directory: {}/",
                start.replacen(start_date, &best, 1),
                end.replacen(start_date, &best, 1),
                available.join(", "),
                self.processed_dir().join(&best).display(),
            );
        }

        let logs = list_data_files(&dir.join(LOG_DIR));
        let traces = list_data_files(&dir.join(TRACE_DIR));
        let metrics: Vec<(&str, Vec<String>)> = METRIC_GROUPS
            .iter()
            .map(|(sub, label)| (*label, list_data_files(&dir.join(sub))))
            .filter(|(_, files)| !files.is_empty())
            .collect();
        let metric_count: usize = metrics.iter().map(|(_, f)| f.len()).sum();
        tracing::info!(
            target: "triage::diagnosis",
            logs = logs.len(),
            metrics = metric_count,
            traces = traces.len(),
            "data files discovered"
        );

        let mut parts = vec![
            "## Available monitoring data files (UTC-aligned)".to_string(),
            format!("Time window: {} to {}", start, end),
            format!("Related date: {}", start_date),
            format!(
                "File statistics: {} logs, {} metrics, {} traces",
                logs.len(),
                metric_count,
                traces.len()
            ),
        ];
        self.push_listing(&mut parts, "Log files", "logs", &logs);
        self.push_listing(&mut parts, "Trace files", "traces", &traces);
        if !metrics.is_empty() {
            parts.push("\n### Metric files:".to_string());
            for (label, files) in &metrics {
                parts.push(format!("\n#### {} ({} files):", label, files.len()));
                parts.extend(files.iter().take(FILES_PER_METRIC_GROUP).map(|f| format!("- {}", f)));
                if files.len() > FILES_PER_METRIC_GROUP {
                    parts.push(format!("- ... and {} more", files.len() - FILES_PER_METRIC_GROUP));
                }
            }
        }
        parts.push(
            "\nNext steps: use preview_table to inspect file structure, then query_table to fetch specific data."
                .to_string(),
        );
        parts.join("\n")
    }

    fn push_listing(&self, parts: &mut Vec<String>, title: &str, noun: &str, files: &[String]) {
        if files.is_empty() {
            return;
        }
        parts.push(format!("\n### {}:", title));
        parts.extend(files.iter().take(self.preview_rows).map(|f| format!("- {}", f)));
        if files.len() > self.preview_rows {
            parts.push(format!("- ... and {} more {}", files.len() - self.preview_rows, noun));
        }
    }

    fn discover_date(&self, date: &str) -> String {
        if self.processed_dir().join(date).is_dir() {
            return format!(
                "## Available monitoring data files\nTarget date: {}\n\
                 Tip: use preview_table to explore specific files under {}/",
                date,
                self.processed_dir().join(date).display()
            );
        }
        let available = self.available_dates();
        if available.is_empty() {
            NO_DATA_HINT.to_string()
        } else {
            format!("Date {} has no data. Available dates: {}", date, available.join(", "))
        }
    }

    /// processed_data 下形如 YYYY-MM-DD 的子目录，升序
    pub fn available_dates(&self) -> Vec<String> {
        let pattern = self.processed_dir().join("*");
        let Some(pattern) = pattern.to_str() else {
            return Vec::new();
        };
        let Ok(paths) = glob::glob(pattern) else {
            return Vec::new();
        };
        let mut dates: Vec<String> = paths
            .filter_map(Result::ok)
            .filter(|p| p.is_dir())
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(String::from))
            .filter(|name| NaiveDate::parse_from_str(name, "%Y-%m-%d").is_ok())
            .collect();
        dates.sort();
        dates
    }
}

/// 与目标日期相差天数最少的可用日期（相同距离取较早者）
fn closest_date(target: &str, available: &[String]) -> Option<String> {
    let target_dt = NaiveDate::parse_from_str(target, "%Y-%m-%d").ok();
    match target_dt {
        Some(t) => available
            .iter()
            .filter_map(|d| {
                NaiveDate::parse_from_str(d, "%Y-%m-%d")
                    .ok()
                    .map(|dt| ((dt - t).num_days().abs(), d))
            })
            .min_by_key(|(dist, _)| *dist)
            .map(|(_, d)| d.clone()),
        None => available.first().cloned(),
    }
}

fn list_data_files(dir: &Path) -> Vec<String> {
    let mut files = Vec::new();
    for ext in DATA_EXTENSIONS {
        let pattern = dir.join(format!("*.{}", ext));
        let Some(pattern) = pattern.to_str() else {
            continue;
        };
        if let Ok(paths) = glob::glob(pattern) {
            files.extend(
                paths
                    .filter_map(Result::ok)
                    .filter(|p| p.is_file())
                    .map(|p| p.display().to_string()),
            );
        }
    }
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn layout() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let day = dir.path().join("processed_data/2025-06-06");
        fs::create_dir_all(day.join("log-parquet")).unwrap();
        fs::create_dir_all(day.join("pod")).unwrap();
        fs::create_dir_all(dir.path().join("processed_data/2025-06-10")).unwrap();
        for i in 0..5 {
            fs::write(day.join(format!("log-parquet/log_{i}.jsonl")), "{}\n").unwrap();
            fs::write(day.join(format!("pod/pod_{i}.csv")), "a\n1\n").unwrap();
        }
        dir
    }

    #[test]
    fn test_window_lists_grouped_files() {
        let dir = layout();
        let d = FileDiscovery::new(dir.path(), 3);
        let text = d.discover("fault from 2025-06-06T10:00:00Z to 2025-06-06T10:30:00Z");
        assert!(text.contains("File statistics: 5 logs, 5 metrics, 0 traces"));
        assert!(text.contains("log_0.jsonl"));
        assert!(text.contains("- ... and 2 more logs"));
        assert!(text.contains("#### Pod Metrics (5 files):"));
        assert!(!text.contains("Trace files"));
    }

    #[test]
    fn test_missing_date_uses_closest() {
        let dir = layout();
        let d = FileDiscovery::new(dir.path(), 3);
        let text = d.discover("window 2025-06-09T01:00:00Z - 2025-06-09T02:00:00Z");
        assert!(text.contains("Adjusted to: 2025-06-10"));
        assert!(text.contains("2025-06-10T01:00:00Z to 2025-06-10T02:00:00Z"));
    }

    #[test]
    fn test_bare_date_and_no_time() {
        let dir = layout();
        let d = FileDiscovery::new(dir.path(), 3);
        assert!(d.discover("issue on 2025-06-06").contains("Target date: 2025-06-06"));
        assert_eq!(
            d.discover("issue on 2025-07-01"),
            "Date 2025-07-01 has no data. Available dates: 2025-06-06, 2025-06-10"
        );
        assert!(d.discover("service slow").starts_with("Unable to extract time information"));
    }

    #[test]
    fn test_no_data_root() {
        let dir = tempfile::tempdir().unwrap();
        let d = FileDiscovery::new(dir.path().join("missing"), 3);
        assert_eq!(d.discover("2025-06-06T10:00:00Z 2025-06-06T11:00:00Z"), NO_DATA_HINT);
    }
}
