use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::Local;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::store::StoreSnapshot;
use crate::task::Task;
use crate::theme::Theme;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    theme: Theme,
}

impl Renderer {
    pub fn new(cfg: &Config, theme: Theme) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => io::stdout().is_terminal(),
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color, theme })
    }

    pub fn plain(theme: Theme) -> Self {
        Self {
            color: false,
            theme,
        }
    }

    #[tracing::instrument(skip(self, tasks, snapshot))]
    pub fn print_task_table(
        &self,
        tasks: &[Task],
        snapshot: &StoreSnapshot,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_task_table(&mut out, tasks, snapshot)
    }

    pub fn write_task_table<W: Write>(
        &self,
        mut out: W,
        tasks: &[Task],
        snapshot: &StoreSnapshot,
    ) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "No tasks.")?;
        } else {
            let headers = vec![
                "ID".to_string(),
                "Done".to_string(),
                "Created".to_string(),
                "Text".to_string(),
            ];

            let rows = tasks
                .iter()
                .map(|task| {
                    let created = task
                        .created_at
                        .map(|at| at.with_timezone(&Local).format("%Y-%m-%d").to_string())
                        .unwrap_or_default();
                    let done = if task.completed { "[x]" } else { "[ ]" };
                    let text = if task.completed {
                        self.paint(&task.text, self.palette().done)
                    } else {
                        task.text.clone()
                    };
                    vec![
                        self.paint(&task.id.to_string(), self.palette().id),
                        done.to_string(),
                        created,
                        text,
                    ]
                })
                .collect();

            write_table(&mut out, headers, rows)?;
        }

        let settings = &snapshot.settings;
        writeln!(
            out,
            "\n{} page {}/{} ({} tasks, {}, {})",
            self.paint("--", self.palette().footer),
            settings.current_page,
            snapshot.totals.total_pages.max(1),
            snapshot.totals.total_items,
            settings.status,
            settings.sort_order.as_str(),
        )?;
        Ok(())
    }

    fn palette(&self) -> Palette {
        match self.theme {
            Theme::Light => Palette {
                id: "33",
                done: "2",
                footer: "34",
            },
            Theme::Dark => Palette {
                id: "93",
                done: "90",
                footer: "96",
            },
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

struct Palette {
    id: &'static str,
    done: &'static str,
    footer: &'static str,
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(header.as_str()))
        .collect();

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    let last = column_count.saturating_sub(1);
    for (idx, header) in headers.iter().enumerate() {
        if idx == last {
            writeln!(writer, "{header}")?;
        } else {
            write!(writer, "{:width$} ", header, width = widths[idx])?;
        }
    }

    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    writeln!(writer, "{}", rule.join(" "))?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate() {
            if idx == last {
                writeln!(writer, "{cell}")?;
            } else {
                let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
                let padding = widths[idx].saturating_sub(visible_width);
                write!(writer, "{}{} ", cell, " ".repeat(padding))?;
            }
        }
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
