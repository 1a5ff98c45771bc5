//! Command-line front end over [`WikiStorage`].

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};

use crate::config::StoreConfig;
use crate::engine::WikiStorage;
use crate::types::{EditInfo, Revision, Version};

/// `wikivcs` command line.
#[derive(Parser)]
#[command(name = "wikivcs")]
#[command(about = "Versioned wiki page and attachment storage", long_about = None)]
pub struct Cli {
    /// Configuration file (.toml or .json).
    #[arg(short, long, env = "WIKIVCS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Page repository, overriding the configuration.
    #[arg(long)]
    pub pages: Option<PathBuf>,

    /// Attachment repository, overriding the configuration.
    #[arg(long)]
    pub attachments: Option<PathBuf>,

    /// Operation to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Author and change note of a write.
#[derive(Args, Clone, Debug, Default)]
pub struct EditArgs {
    /// Author name, looked up in the configured users.
    #[arg(short, long, env = "WIKIVCS_AUTHOR")]
    pub author: Option<String>,

    /// Change note.
    #[arg(short, long)]
    pub message: Option<String>,
}

impl EditArgs {
    fn edit_info(&self) -> EditInfo {
        EditInfo {
            author: self.author.clone(),
            change_note: self.message.clone(),
            modified: None,
        }
    }
}

/// Subcommands.
#[allow(missing_docs)]
#[derive(Subcommand)]
pub enum Command {
    /// Store a new page revision read from a file or stdin.
    Put {
        page: String,
        #[arg(short, long)]
        file: Option<PathBuf>,
        #[command(flatten)]
        edit: EditArgs,
    },
    /// Print a page (or an attachment) at a version, latest by default.
    Cat {
        page: String,
        #[arg(long)]
        attachment: Option<String>,
        #[arg(short, long)]
        version: Option<u32>,
    },
    /// List every revision, newest first.
    History {
        page: String,
        #[arg(long)]
        attachment: Option<String>,
    },
    /// Show the metadata of one revision.
    Info {
        page: String,
        #[arg(long)]
        attachment: Option<String>,
        #[arg(short, long)]
        version: Option<u32>,
    },
    /// Delete a page (or an attachment); history is kept.
    Rm {
        page: String,
        #[arg(long)]
        attachment: Option<String>,
        #[command(flatten)]
        edit: EditArgs,
    },
    /// Rename a page together with its attachments.
    Mv {
        from: String,
        to: String,
        #[command(flatten)]
        edit: EditArgs,
    },
    /// List all pages with their latest revision.
    Pages,
    /// Store a new attachment revision from a file.
    Attach {
        page: String,
        name: String,
        source: PathBuf,
        #[command(flatten)]
        edit: EditArgs,
    },
    /// List the attachments of a page.
    Attachments { page: String },
    /// List documents committed after a point in time (RFC 3339 or unix seconds).
    ChangedSince {
        #[arg(value_parser = parse_time)]
        since: DateTime<Utc>,
        /// List pages instead of attachments.
        #[arg(long)]
        pages: bool,
    },
}

impl Cli {
    /// Configuration file (or defaults) with the directory flags applied.
    pub fn store_config(&self) -> Result<StoreConfig> {
        let mut config = match &self.config {
            Some(path) => StoreConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => StoreConfig::default(),
        };
        if let Some(dir) = &self.pages {
            config.page_dir = dir.clone();
        }
        if let Some(dir) = &self.attachments {
            config.attachment_dir = dir.clone();
        }
        Ok(config)
    }

    /// Opens the configured storage and runs the subcommand, printing to stdout.
    pub fn run(self) -> Result<()> {
        let wiki = WikiStorage::open(&self.store_config()?)?;
        let mut out = io::stdout().lock();
        execute(&wiki, self.command, &mut out)
    }
}

/// Runs `command` against `wiki`, printing results to `out`.
pub fn execute(wiki: &WikiStorage, command: Command, out: &mut impl Write) -> Result<()> {
    match command {
        Command::Put { page, file, edit } => {
            let mut text = String::new();
            match file {
                Some(path) => {
                    File::open(&path)
                        .and_then(|mut f| f.read_to_string(&mut text))
                        .with_context(|| format!("reading {}", path.display()))?;
                }
                None => {
                    io::stdin().read_to_string(&mut text)?;
                }
            }
            wiki.pages().write(&page, &text, &edit.edit_info())?;
            let rev = wiki.pages().info(&page, Version::Latest)?;
            writeln!(out, "{} version {}", page, rev.version)?;
        }
        Command::Cat {
            page,
            attachment,
            version,
        } => {
            let version = to_version(version);
            match attachment {
                Some(name) => {
                    let bytes = wiki.attachments().read_version(&page, &name, version)?;
                    out.write_all(&bytes)?;
                }
                None => {
                    let text = wiki.pages().read_version(&page, version)?;
                    out.write_all(text.as_bytes())?;
                }
            }
        }
        Command::History { page, attachment } => {
            let history = match attachment {
                Some(name) => wiki.attachments().history(&page, &name)?,
                None => wiki.pages().history(&page)?,
            };
            print_revisions(out, &history)?;
        }
        Command::Info {
            page,
            attachment,
            version,
        } => {
            let version = to_version(version);
            let rev = match attachment {
                Some(name) => wiki.attachments().info(&page, &name, version)?,
                None => wiki.pages().info(&page, version)?,
            };
            writeln!(out, "document: {}", rev.document)?;
            writeln!(out, "version:  {}", rev.version)?;
            writeln!(out, "author:   {}", rev.author)?;
            if let Some(email) = &rev.email {
                writeln!(out, "email:    {}", email)?;
            }
            writeln!(out, "time:     {}", rev.commit_time.to_rfc3339())?;
            if let Some(note) = &rev.change_note {
                writeln!(out, "note:     {}", note)?;
            }
            if let Some(size) = rev.size {
                writeln!(out, "size:     {}", size)?;
            }
            writeln!(out, "commit:   {}", rev.commit)?;
        }
        Command::Rm {
            page,
            attachment,
            edit,
        } => match attachment {
            Some(name) => wiki.attachments().delete(&page, &name, &edit.edit_info())?,
            None => wiki.pages().delete(&page, &edit.edit_info())?,
        },
        Command::Mv { from, to, edit } => {
            wiki.rename_page(&from, &to, &edit.edit_info())?;
        }
        Command::Pages => print_revisions(out, &wiki.pages().list_pages()?)?,
        Command::Attach {
            page,
            name,
            source,
            edit,
        } => {
            let written = attach(wiki, &page, &name, &source, &edit)?;
            writeln!(out, "{}/{}: {} bytes", page, name, written)?;
        }
        Command::Attachments { page } => {
            print_revisions(out, &wiki.attachments().list_attachments(&page)?)?
        }
        Command::ChangedSince { since, pages } => {
            let changed = if pages {
                wiki.pages().list_changed_since(since)?
            } else {
                wiki.attachments().list_all_changed_since(since)?
            };
            print_revisions(out, &changed)?;
        }
    }
    Ok(())
}

fn attach(wiki: &WikiStorage, page: &str, name: &str, source: &Path, edit: &EditArgs) -> Result<u64> {
    let mut file =
        File::open(source).with_context(|| format!("opening {}", source.display()))?;
    Ok(wiki
        .attachments()
        .write(page, name, &mut file, &edit.edit_info())?)
}

fn to_version(version: Option<u32>) -> Version {
    version.map_or(Version::Latest, Version::Number)
}

fn print_revisions(out: &mut impl Write, revisions: &[Revision]) -> Result<()> {
    for rev in revisions {
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}",
            rev.document,
            rev.version,
            rev.commit_time.to_rfc3339(),
            rev.author,
            rev.change_note.as_deref().unwrap_or("")
        )?;
    }
    Ok(())
}

fn parse_time(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    s.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| format!("not an RFC 3339 time or unix timestamp: {}", s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn wiki(dir: &TempDir) -> WikiStorage {
        WikiStorage::open(&StoreConfig::under(dir.path())).unwrap()
    }

    fn run(wiki: &WikiStorage, args: &[&str]) -> String {
        let cli = Cli::parse_from(std::iter::once("wikivcs").chain(args.iter().copied()));
        let mut out = Vec::new();
        execute(wiki, cli.command, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_cli_cat_subcommand() {
        let cli = Cli::parse_from(["wikivcs", "cat", "Foo", "--version", "2"]);
        match cli.command {
            Command::Cat {
                page,
                attachment,
                version,
            } => {
                assert_eq!(page, "Foo");
                assert!(attachment.is_none());
                assert_eq!(version, Some(2));
            }
            _ => panic!("Expected Cat command"),
        }
    }

    #[test]
    fn test_cli_global_dirs() {
        let cli = Cli::parse_from([
            "wikivcs",
            "--pages",
            "/tmp/p",
            "--attachments",
            "/tmp/a",
            "pages",
        ]);
        let config = cli.store_config().unwrap();
        assert_eq!(config.page_dir, PathBuf::from("/tmp/p"));
        assert_eq!(config.attachment_dir, PathBuf::from("/tmp/a"));
    }

    #[test]
    fn test_cli_changed_since_parses_times() {
        let cli = Cli::parse_from(["wikivcs", "changed-since", "1700000000"]);
        match cli.command {
            Command::ChangedSince { since, pages } => {
                assert_eq!(since.timestamp(), 1_700_000_000);
                assert!(!pages);
            }
            _ => panic!("Expected ChangedSince command"),
        }
        let cli = Cli::parse_from(["wikivcs", "changed-since", "2024-01-01T00:00:00Z", "--pages"]);
        assert!(matches!(cli.command, Command::ChangedSince { pages: true, .. }));
        assert!(Cli::try_parse_from(["wikivcs", "changed-since", "yesterday"]).is_err());
    }

    #[test]
    fn test_put_cat_history() {
        let dir = TempDir::new().unwrap();
        let wiki = wiki(&dir);
        let source = dir.path().join("foo.txt");
        std::fs::write(&source, "hello").unwrap();

        let put = run(&wiki, &["put", "Foo", "--file", source.to_str().unwrap(), "-m", "first"]);
        assert_eq!(put, "Foo version 1\n");
        std::fs::write(&source, "world").unwrap();
        run(&wiki, &["put", "Foo", "--file", source.to_str().unwrap()]);

        assert_eq!(run(&wiki, &["cat", "Foo"]), "world");
        assert_eq!(run(&wiki, &["cat", "Foo", "-v", "1"]), "hello");

        let history = run(&wiki, &["history", "Foo"]);
        let lines: Vec<_> = history.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("page Foo\t2\t"));
        assert!(lines[1].ends_with("\tunknown\tfirst"));
    }

    #[test]
    fn test_attach_and_list() {
        let dir = TempDir::new().unwrap();
        let wiki = wiki(&dir);
        let source = dir.path().join("img.png");
        std::fs::write(&source, b"png-bytes").unwrap();

        let out = run(&wiki, &["attach", "Foo", "img.png", source.to_str().unwrap()]);
        assert_eq!(out, "Foo/img.png: 9 bytes\n");
        let listed = run(&wiki, &["attachments", "Foo"]);
        assert!(listed.starts_with("attachment Foo/img.png\t1\t"));
        let info = run(&wiki, &["info", "Foo", "--attachment", "img.png"]);
        assert!(info.contains("size:     9"));
    }
}
