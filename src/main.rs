//! Terminal client for the Lexica corpus search

use anyhow::{anyhow, bail, Result};
use lexica::highlight::highlight;
use lexica::prep;
use lexica::session::{Phase, SearchSession, SessionState};
use lexica::store::{CorpusStore, Lookup, DEFAULT_VERSE_PAGE};
use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

const HIGHLIGHT: &str = "\x1b[93m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

enum Mode {
    Interactive,
    Words(String),
    Verses(String),
    Stats,
    Prep,
}

struct Cli {
    db_path: PathBuf,
    mode: Mode,
    json: bool,
    limit: usize,
    offset: usize,
}

fn parse_args() -> Result<Cli> {
    let mut cli = Cli {
        db_path: default_db_path(),
        mode: Mode::Interactive,
        json: false,
        limit: DEFAULT_VERSE_PAGE,
        offset: 0,
    };
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-d" | "--db" => cli.db_path = PathBuf::from(next_value(&mut args, &arg)?),
            "-w" | "--words" => cli.mode = Mode::Words(next_value(&mut args, &arg)?),
            "-v" | "--verses" => cli.mode = Mode::Verses(next_value(&mut args, &arg)?),
            "--stats" => cli.mode = Mode::Stats,
            "--prep" => cli.mode = Mode::Prep,
            "--json" => cli.json = true,
            "--limit" => cli.limit = next_value(&mut args, &arg)?.parse()?,
            "--offset" => cli.offset = next_value(&mut args, &arg)?.parse()?,
            "-h" | "--help" => print_help(),
            other => bail!("unknown argument: {other} (try --help)"),
        }
    }
    Ok(cli)
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    args.next().ok_or_else(|| anyhow!("{flag} requires a value"))
}

fn default_db_path() -> PathBuf {
    env::var("LEXICA_DB")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("lexica.sqlite3"))
}

fn print_help() -> ! {
    println!(
        "Usage: lexica [--db <path>] [MODE] [OPTIONS]

Modes (default: interactive search):
  -w, --words <partial>   list word forms matching the partial text
  -v, --verses <word>     list verses containing the exact word
      --stats             corpus statistics
      --prep              derive the text_nfd matching column in place

Options:
      --db <path>         database file (default: $LEXICA_DB, then lexica.sqlite3)
      --limit <n>         verse page size (default {DEFAULT_VERSE_PAGE})
      --offset <n>        verse page offset
      --json              print results as JSON

Interactive commands: type Greek text to search, a number to pick a
candidate, m for more verses, :q to quit."
    );
    std::process::exit(0);
}

fn render_highlighted(text: &str, term: &str) -> String {
    highlight(text, term)
        .into_iter()
        .map(|seg| {
            if seg.is_match {
                format!("{HIGHLIGHT}{}{RESET}", seg.text)
            } else {
                seg.text
            }
        })
        .collect()
}

fn run_words(store: &CorpusStore, partial: &str, json: bool) -> Result<()> {
    let partial = partial.to_lowercase();
    let words = store.find_words(&partial)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&words)?);
        return Ok(());
    }
    if words.is_empty() {
        println!("No matches found for '{partial}'.");
        return Ok(());
    }
    println!("Words matching '{partial}':\n");
    for w in &words {
        println!("  - {}", w.text);
    }
    Ok(())
}

fn run_verses(store: &CorpusStore, word: &str, limit: usize, offset: usize, json: bool) -> Result<()> {
    let verses = store.find_verses(word, limit, offset)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&verses)?);
        return Ok(());
    }
    if verses.is_empty() {
        println!("No verses found containing '{word}'.");
        return Ok(());
    }
    println!("Found {} verse(s) containing '{word}':\n", verses.len());
    for v in &verses {
        println!("{BOLD}{}{RESET}", v.reference);
        println!("    {}\n", render_highlighted(&v.text, word));
    }
    if verses.len() == limit {
        println!(
            "More results may be available: rerun with --offset {}",
            offset + limit
        );
    }
    Ok(())
}

fn run_stats(store: &CorpusStore, json: bool) -> Result<()> {
    let stats = store.stats()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    println!("tokens:         {}", stats.tokens);
    println!("distinct words: {}", stats.distinct_words);
    println!("verses:         {}", stats.verses);
    Ok(())
}

fn render_session(out: &mut impl Write, st: &SessionState) -> Result<()> {
    if let Some(error) = &st.error {
        writeln!(out, "Error: {error}")?;
        return Ok(());
    }
    match st.phase() {
        Phase::Idle => writeln!(out, "(cleared)")?,
        Phase::WordsShown if st.word_results.is_empty() => {
            writeln!(out, "No matches found for '{}'.", st.search_term)?;
        }
        Phase::WordsShown => {
            writeln!(out, "Matched words:")?;
            for (i, w) in st.word_results.iter().enumerate() {
                writeln!(out, "  {}. {}", i + 1, w.text)?;
            }
        }
        Phase::VersesShown => {
            let term = st.selected_word.as_deref().unwrap_or("");
            if st.verses.is_empty() {
                writeln!(out, "No verses found containing '{term}'.")?;
            }
            for v in &st.verses {
                writeln!(out, "{BOLD}{}{RESET}", v.reference)?;
                writeln!(out, "    {}\n", render_highlighted(&v.text, term))?;
            }
            if st.more_verses {
                writeln!(out, "(m for more)")?;
            }
        }
        _ => {}
    }
    Ok(())
}

async fn repl(store: Arc<CorpusStore>) -> Result<()> {
    let session = SearchSession::new(store);
    let stdin = io::stdin();
    let mut out = io::stdout();

    writeln!(out, "Lexica - search the Greek New Testament")?;
    writeln!(
        out,
        "Type Greek text to search, a number to pick a candidate, m for more verses, :q to quit."
    )?;

    let mut line = String::new();
    loop {
        write!(out, "> ")?;
        out.flush()?;
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == ":q" || input == ":quit" {
            break;
        }

        if input == "m" {
            session.load_more_verses().await?;
        } else if let Ok(choice) = input.parse::<usize>() {
            let candidates = session.snapshot().word_results;
            match choice
                .checked_sub(1)
                .and_then(|i| candidates.get(i))
            {
                Some(word) => session.handle_word_select(&word.text).await?,
                None => {
                    writeln!(out, "No candidate #{choice}")?;
                    continue;
                }
            }
        } else {
            session.handle_search(input).await?;
        }

        render_session(&mut out, &session.snapshot())?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = parse_args()?;

    if matches!(cli.mode, Mode::Prep) {
        let updated = prep::populate_text_nfd(&cli.db_path)?;
        prep::create_diacritic_free_view(&cli.db_path)?;
        println!("Prepared {updated} tokens in {}", cli.db_path.display());
        return Ok(());
    }

    let store = Arc::new(CorpusStore::open(&cli.db_path)?);

    match cli.mode {
        Mode::Words(partial) => run_words(&store, &partial, cli.json),
        Mode::Verses(word) => run_verses(&store, &word, cli.limit, cli.offset, cli.json),
        Mode::Stats => run_stats(&store, cli.json),
        Mode::Interactive => repl(store).await,
        Mode::Prep => unreachable!(),
    }
}
