//! Headless mode for the storybook reader.
//!
//! A line-oriented protocol over stdin/stdout, designed for automated testing
//! and scripted reading.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use storybook_core::{prefetch, Intent, Page, ReadingSession, SpreadFrame, Transition};
use tokio::io::{self, AsyncBufReadExt, BufReader};

/// Command line options.
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderOptions {
    pub story_path: PathBuf,
    pub name: String,
    pub character_path: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub resume_path: Option<PathBuf>,
}

/// Parse command line arguments (without the program name).
pub fn parse_options(args: &[String]) -> Result<ReaderOptions, String> {
    let mut story_path = None;
    let mut options = ReaderOptions {
        story_path: PathBuf::new(),
        name: "Reader".to_string(),
        character_path: None,
        cache_dir: None,
        resume_path: None,
    };

    let mut args = args.iter();
    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next()
                .cloned()
                .ok_or_else(|| format!("{flag} needs a value"))
        };
        match arg.as_str() {
            "--name" => options.name = value("--name")?,
            "--character" => options.character_path = Some(value("--character")?.into()),
            "--cache-dir" => options.cache_dir = Some(value("--cache-dir")?.into()),
            "--resume" => options.resume_path = Some(value("--resume")?.into()),
            flag if flag.starts_with("--") => return Err(format!("unknown option {flag}")),
            path if story_path.is_none() => story_path = Some(PathBuf::from(path)),
            extra => return Err(format!("unexpected argument {extra}")),
        }
    }

    options.story_path = story_path.ok_or("missing story file")?;
    Ok(options)
}

/// One line of reader input.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Intent(Intent),
    /// Take the n-th visible choice, counting from 1.
    Pick(usize),
    Replay,
    Status,
    Flags,
    Art,
    Prefetch(Vec<String>),
    Regenerate(String),
    Save(String),
    Load(String),
    Help,
    Quit,
    Unknown(String),
}

fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match line {
        ">" | "next" => return Some(Command::Intent(Intent::Advance)),
        "<" | "back" => return Some(Command::Intent(Intent::Retreat)),
        _ => {}
    }
    if let Ok(n) = line.parse::<usize>() {
        return Some(Command::Pick(n));
    }

    let Some(rest) = line.strip_prefix('#') else {
        return Some(Command::Unknown(line.to_string()));
    };
    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let args: Vec<String> = parts.map(str::to_string).collect();
    let single = |make: fn(String) -> Command| match args.as_slice() {
        [one] => make(one.clone()),
        _ => Command::Unknown(line.to_string()),
    };

    Some(match name {
        "choose" => single(|id| Command::Intent(Intent::ChooseTarget(id))),
        "restart" => Command::Intent(Intent::Restart),
        "replay" => Command::Replay,
        "status" => Command::Status,
        "flags" => Command::Flags,
        "art" => Command::Art,
        "prefetch" if !args.is_empty() => Command::Prefetch(args.clone()),
        "regenerate" => single(Command::Regenerate),
        "save" => single(Command::Save),
        "load" => single(Command::Load),
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => Command::Unknown(line.to_string()),
    })
}

/// Run a reading session over stdin/stdout until `#quit` or end of input.
pub async fn run_headless(mut session: ReadingSession) -> io::Result<()> {
    println!("=== {} ===", session.story().title());
    print_help();
    println!();
    let now = settle(&mut session);
    print_frame(&session.frame(now));

    let mut lines = BufReader::new(io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let Some(command) = parse_command(&line) else {
            continue;
        };

        match command {
            Command::Intent(intent) => {
                apply(&mut session, intent);
            }
            Command::Pick(n) => {
                let now = Instant::now();
                let target = {
                    let frame = session.frame(now);
                    visible_choices(&frame)
                        .get(n.wrapping_sub(1))
                        .map(|(_, target)| target.to_string())
                };
                match target {
                    Some(target) => apply(&mut session, Intent::ChooseTarget(target)),
                    None => println!("[ERROR] No choice numbered {n}"),
                }
            }
            Command::Replay => {
                session.replay(Instant::now());
                println!("[REPLAY] Fresh session {}", session.id());
                let now = settle(&mut session);
                print_frame(&session.frame(now));
            }
            Command::Status => print_status(&session),
            Command::Flags => {
                println!("[FLAGS]");
                for (name, value) in session.flags().iter() {
                    println!("  {name} = {value}");
                }
                let visited: Vec<&str> = session.visited().iter().collect();
                println!("  visited: {}", visited.join(", "));
            }
            Command::Art => {
                for image in session.illustrate_visible().await {
                    let status = image
                        .record
                        .as_ref()
                        .map(|r| r.status.to_string())
                        .unwrap_or_else(|| "authored".to_string());
                    let side = match image.page {
                        Page::Left => "LEFT",
                        Page::Right => "RIGHT",
                    };
                    println!("[ART] {side} {} {status} {}", image.scene_id, shorten(&image.src));
                }
            }
            Command::Prefetch(ids) => match session.illustrator() {
                Some(illustrator) => {
                    let report = prefetch(&illustrator.cache, &ids, &illustrator.character, |p| {
                        let origin = if p.was_cached { "cached" } else { "new" };
                        println!(
                            "[PREFETCH] {}/{} {} {} ({origin})",
                            p.position + 1,
                            p.total,
                            p.scene_id,
                            p.record.status
                        );
                    })
                    .await;
                    println!(
                        "[PREFETCH] done: {} cached, {} generated, {} failed",
                        report.already_cached, report.generated, report.failed
                    );
                }
                None => println!("[ERROR] No illustrator configured"),
            },
            Command::Regenerate(id) => match session.illustrator() {
                Some(illustrator) => {
                    match illustrator.cache.regenerate(&id, &illustrator.character).await {
                        Ok(record) => println!("[ART] {id} {} {}", record.status, record.note),
                        Err(e) => println!("[ERROR] {e}"),
                    }
                }
                None => println!("[ERROR] No illustrator configured"),
            },
            Command::Save(path) => match session.save(&path).await {
                Ok(()) => println!("[SAVED] Bookmark saved to {path}"),
                Err(e) => println!("[ERROR] Save failed: {e}"),
            },
            Command::Load(path) => {
                let story = Arc::clone(session.story());
                let config = session.navigator_config().clone();
                match ReadingSession::resume(story, config, &path, Instant::now()).await {
                    Ok(loaded) => {
                        session = match session.illustrator().cloned() {
                            Some(illustrator) => loaded.with_illustrator(illustrator),
                            None => loaded,
                        };
                        println!("[LOADED] Bookmark loaded from {path}");
                        let now = settle(&mut session);
                        print_frame(&session.frame(now));
                    }
                    Err(e) => println!("[ERROR] Load failed: {e}"),
                }
            }
            Command::Help => print_help(),
            Command::Quit => {
                println!("Goodbye!");
                break;
            }
            Command::Unknown(line) => {
                println!("[ERROR] Unknown command: {line}. Type #help for help.");
            }
        }
    }

    Ok(())
}

fn apply(session: &mut ReadingSession, intent: Intent) {
    match session.apply(intent, Instant::now()) {
        Transition::Blocked(reason) => println!("[BLOCKED] {reason}"),
        _ => {}
    }
    let now = settle(session);
    print_frame(&session.frame(now));
}

/// The instant at which every scheduled reveal has happened.
fn settle(session: &mut ReadingSession) -> Instant {
    let config = session.navigator_config();
    let now = Instant::now() + config.left_reveal_delay.max(config.right_reveal_delay);
    session.tick(now);
    now
}

/// Choices on visible pages, left page first, as `(label, target)`.
fn visible_choices<'a>(frame: &SpreadFrame<'a>) -> Vec<(&'a str, &'a str)> {
    frame
        .left_choices
        .iter()
        .chain(frame.right_choices.iter())
        .map(|c| (c.label.as_str(), c.target.as_str()))
        .collect()
}

fn print_frame(frame: &SpreadFrame<'_>) {
    let phase = match frame.phase {
        storybook_core::Phase::LeftOnly => "left page",
        storybook_core::Phase::FullSpread => "full spread",
    };
    println!("[SPREAD] {} ({phase})", frame.index);

    if let Some(left) = frame.left.filter(|_| frame.left_revealed) {
        println!("[LEFT] {}: {}", left.id, left.text);
    }
    if let Some(right) = frame.right.filter(|_| frame.right_revealed) {
        println!("[RIGHT] {}: {}", right.id, right.text);
    }

    let choices = visible_choices(frame);
    if choices.len() > 1 {
        for (i, (label, target)) in choices.iter().enumerate() {
            println!("  {}) {label} -> {target}", i + 1);
        }
    }

    if let Some(advisory) = &frame.advisory {
        println!("[ADVISORY] {}", advisory.message);
    }
    if frame.at_end {
        println!("[END] You've reached the end. Type #restart or #replay to read again.");
    }
    println!();
}

fn print_status(session: &ReadingSession) {
    let spread = session.spread();
    println!("[STATUS]");
    println!("  Story: {}", session.story().title());
    println!("  Session: {}", session.id());
    println!("  Spread: {} ({:?})", spread.index, spread.phase);
    println!("  Flags set: {}", session.flags().len());
    println!("  Scenes visited: {}", session.visited().len());
    if let Some(illustrator) = session.illustrator() {
        println!("  Character: {}", illustrator.character.name);
    }
}

fn print_help() {
    println!("Commands:");
    println!("  > | next          - Reveal the right page or turn the page");
    println!("  < | back          - Hide the right page or turn back");
    println!("  <n>               - Take the n-th listed choice");
    println!("  #choose <scene>   - Take the choice leading to a scene");
    println!("  #restart          - Back to the start, keeping flags");
    println!("  #replay           - Start over with a fresh session");
    println!("  #status | #flags  - Show session state");
    println!("  #art              - Illustrate the visible pages");
    println!("  #prefetch <ids>   - Illustrate scenes ahead of time");
    println!("  #regenerate <id>  - Illustrate a scene again");
    println!("  #save <path>      - Save a bookmark");
    println!("  #load <path>      - Load a bookmark");
    println!("  #help | #quit");
}

/// Long data URIs are cut for display.
fn shorten(src: &str) -> String {
    const MAX: usize = 60;
    if src.len() <= MAX {
        src.to_string()
    } else {
        let cut = (0..=MAX).rev().find(|&i| src.is_char_boundary(i)).unwrap_or(0);
        format!("{}...", &src[..cut])
    }
}
