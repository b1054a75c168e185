//! Per-OS application table and command plans.
//!
//! Everything here is pure: it decides *what* to run. [`SystemLauncher`]
//! (in the parent module) runs it.
//!
//! [`SystemLauncher`]: super::SystemLauncher

use std::collections::BTreeMap;

/// Host operating system family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Linux
        }
    }
}

const WINDOWS_APPS: &[(&str, &str)] = &[
    ("chrome", r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
    ("google chrome", r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
    ("notepad", "notepad.exe"),
    (
        "vscode",
        r"C:\Users\%USERNAME%\AppData\Local\Programs\Microsoft VS Code\Code.exe",
    ),
    (
        "visual studio code",
        r"C:\Users\%USERNAME%\AppData\Local\Programs\Microsoft VS Code\Code.exe",
    ),
    ("cmd", "cmd.exe"),
    ("calculator", "calc.exe"),
    ("explorer", "explorer.exe"),
    (
        "word",
        r"C:\Program Files\Microsoft Office\root\Office16\WINWORD.EXE",
    ),
];

const LINUX_APPS: &[(&str, &str)] = &[
    ("chrome", "google-chrome"),
    ("google chrome", "google-chrome"),
    ("notepad", "gedit"),
    ("vscode", "code"),
    ("visual studio code", "code"),
    ("terminal", "x-terminal-emulator"),
    ("calculator", "gnome-calculator"),
    ("files", "nautilus"),
    ("word", "libreoffice --writer"),
];

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPlan {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandPlan {
    fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| (*a).to_owned()).collect(),
        }
    }

    /// Split a table entry like `"libreoffice --writer"`. Windows paths
    /// contain spaces and are never split.
    fn from_entry(entry: &str, platform: Platform) -> Self {
        if platform == Platform::Windows {
            return Self::new(expand_env_vars(entry), &[]);
        }
        let mut parts = entry.split_whitespace();
        let program = parts.next().unwrap_or(entry).to_owned();
        Self {
            program,
            args: parts.map(str::to_owned).collect(),
        }
    }
}

/// Expand `%NAME%` references from the environment; unknown names are kept.
pub fn expand_env_vars(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('%') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('%') {
            Some(end) => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(value) if !name.is_empty() => out.push_str(&value),
                    _ => {
                        out.push('%');
                        out.push_str(name);
                        out.push('%');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push('%');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn table_entry<'a>(
    platform: Platform,
    overrides: &'a BTreeMap<String, String>,
    name: &str,
) -> Option<&'a str> {
    let key = name.trim().to_lowercase();
    if let Some(entry) = overrides.get(&key) {
        return Some(entry.as_str());
    }
    let table = match platform {
        Platform::Windows => WINDOWS_APPS,
        Platform::Linux => LINUX_APPS,
        Platform::MacOs => &[],
    };
    table
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| *v)
}

/// How to launch `name`. Config overrides win over the built-in table.
pub fn open_plan(platform: Platform, overrides: &BTreeMap<String, String>, name: &str) -> CommandPlan {
    let name = name.trim();
    if let Some(entry) = table_entry(platform, overrides, name) {
        return CommandPlan::from_entry(entry, platform);
    }
    match platform {
        Platform::Windows => CommandPlan::new("cmd", &["/C", "start", "", name]),
        Platform::MacOs => CommandPlan::new("open", &["-a", name]),
        Platform::Linux => CommandPlan::new(name, &[]),
    }
}

/// How to close `name`.
pub fn close_plan(platform: Platform, overrides: &BTreeMap<String, String>, name: &str) -> CommandPlan {
    let name = name.trim();
    let program = table_entry(platform, overrides, name)
        .map(|entry| CommandPlan::from_entry(entry, platform).program);
    match platform {
        Platform::Windows => {
            let image = program
                .as_deref()
                .and_then(|p| p.rsplit('\\').next())
                .map(str::to_owned)
                .unwrap_or_else(|| format!("{name}.exe"));
            CommandPlan::new("taskkill", &["/IM", &image, "/F"])
        }
        Platform::MacOs => {
            let script = format!("quit app \"{}\"", name.replace('"', ""));
            CommandPlan::new("osascript", &["-e", &script])
        }
        Platform::Linux => {
            let program = program.unwrap_or_else(|| name.to_owned());
            CommandPlan::new("pkill", &["-f", &program])
        }
    }
}

/// How to open `url` in the default browser.
pub fn open_url_plan(platform: Platform, url: &str) -> CommandPlan {
    match platform {
        Platform::Windows => CommandPlan::new("cmd", &["/C", "start", "", url]),
        Platform::MacOs => CommandPlan::new("open", &[url]),
        Platform::Linux => CommandPlan::new("xdg-open", &[url]),
    }
}

/// Title-cased app name for replies ("visual studio code" → "Visual Studio Code").
pub fn display_name(name: &str) -> String {
    name.split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(c) => c.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn none() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    #[test]
    fn windows_table_and_fallback() {
        let plan = open_plan(Platform::Windows, &none(), "Notepad");
        assert_eq!(plan.program, "notepad.exe");
        let plan = open_plan(Platform::Windows, &none(), "spotify");
        assert_eq!(plan.program, "cmd");
        assert_eq!(plan.args, vec!["/C", "start", "", "spotify"]);
    }

    #[test]
    fn macos_uses_open_a() {
        let plan = open_plan(Platform::MacOs, &none(), "Safari");
        assert_eq!(plan, CommandPlan::new("open", &["-a", "Safari"]));
    }

    #[test]
    fn linux_runs_name_or_table_entry() {
        assert_eq!(open_plan(Platform::Linux, &none(), "firefox").program, "firefox");
        let word = open_plan(Platform::Linux, &none(), "word");
        assert_eq!(word.program, "libreoffice");
        assert_eq!(word.args, vec!["--writer"]);
    }

    #[test]
    fn overrides_take_precedence() {
        let mut overrides = BTreeMap::new();
        overrides.insert("notepad".to_owned(), "kate".to_owned());
        assert_eq!(open_plan(Platform::Linux, &overrides, "Notepad").program, "kate");
        assert_eq!(
            close_plan(Platform::Linux, &overrides, "notepad"),
            CommandPlan::new("pkill", &["-f", "kate"])
        );
    }

    #[test]
    fn close_plans() {
        assert_eq!(
            close_plan(Platform::Windows, &none(), "chrome"),
            CommandPlan::new("taskkill", &["/IM", "chrome.exe", "/F"])
        );
        assert_eq!(
            close_plan(Platform::Windows, &none(), "paint"),
            CommandPlan::new("taskkill", &["/IM", "paint.exe", "/F"])
        );
        assert_eq!(
            close_plan(Platform::MacOs, &none(), "Safari"),
            CommandPlan::new("osascript", &["-e", "quit app \"Safari\""])
        );
    }

    #[test]
    fn url_plans() {
        assert_eq!(open_url_plan(Platform::Linux, "https://a.b").program, "xdg-open");
        assert_eq!(open_url_plan(Platform::MacOs, "https://a.b").args, vec!["https://a.b"]);
    }

    #[test]
    fn env_expansion_keeps_unknown_names() {
        assert_eq!(
            expand_env_vars("a %VOCAL_SURELY_UNSET_VAR% b"),
            "a %VOCAL_SURELY_UNSET_VAR% b"
        );
        assert_eq!(expand_env_vars("50% done"), "50% done");
    }

    #[test]
    fn display_names() {
        assert_eq!(display_name("visual studio code"), "Visual Studio Code");
        assert_eq!(display_name("notepad"), "Notepad");
    }
}
