//! examdb interactive shell
//!
//! Imports exam CSV exports and browses them through the indexes.

use anyhow::{bail, Context};
use examdb::index::LeafEntry;
use examdb::{DBConfig, ExamDB, ExamRecord, RecordId, ScoreField, SortOrder};
use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let mut args = env::args().skip(1);
    let mut data_dir: Option<PathBuf> = None;
    let mut config_file: Option<PathBuf> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-v" => {
                println!("examdb v{}", VERSION);
                return Ok(());
            }
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            "--config" | "-c" => {
                let path = args.next().context("--config needs a file argument")?;
                config_file = Some(PathBuf::from(path));
            }
            other if other.starts_with('-') => {
                print_usage();
                bail!("unknown option '{}'", other);
            }
            path => {
                if data_dir.is_some() {
                    print_usage();
                    bail!("more than one data directory given");
                }
                data_dir = Some(PathBuf::from(path));
            }
        }
    }

    let mut config = match &config_file {
        Some(path) => DBConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => DBConfig::default(),
    };
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }

    let db = ExamDB::open(config.clone()).with_context(|| format!("opening {}", config.data_dir.display()))?;
    let stdin = io::stdin();
    let mut input = stdin.lock();
    Shell { db, input: &mut input }.run()
}

fn print_usage() {
    println!(
        r#"
examdb v{} - exam result indexes

Usage:
  examdb-cli [data_dir] [--config file.json]
  examdb-cli --version
  examdb-cli --help

Defaults: data_dir ./examdb_data, B+ tree order 512, 5 records per page.
Set RUST_LOG=debug to trace index operations.
"#,
        VERSION
    );
}

fn print_commands() {
    println!(
        r#"
Commands:
  READ <file.csv>              import a ';'-separated export
  SHOW                         list every record
  LIST <cn|ch|lc|mt|red> [asc|desc]
                               list records ranked by one score
  RANGE <field> <low> <high>   records with low <= score <= high
  FIND <sequence>              look up one record by sequence number
  FILTER <UF>                  list the records of one state
  CONFIG <records_per_page>    change the page size
  STATS                        index and table statistics
  CLEAR                        delete every record and index
  HELP                         this list
  EXIT                         quit

Inside a listing: n (next), p (previous), <page number>, back
"#
    );
}

struct Shell<'a, R: BufRead> {
    db: ExamDB,
    input: &'a mut R,
}

impl<R: BufRead> Shell<'_, R> {
    fn run(mut self) -> anyhow::Result<()> {
        println!("examdb v{}", VERSION);
        println!("Data directory: {}", self.db.data_dir().display());
        println!("{} records. Type HELP for commands.\n", self.db.record_count());

        loop {
            let Some(line) = self.prompt("examdb> ")? else {
                break;
            };
            let mut words = line.split_whitespace();
            let Some(command) = words.next() else {
                continue;
            };
            let rest: Vec<&str> = words.collect();

            let result = match command.to_ascii_lowercase().as_str() {
                "exit" | "quit" => break,
                "help" => {
                    print_commands();
                    Ok(())
                }
                "read" => self.read(&rest),
                "show" => self.show(),
                "list" => self.list(&rest),
                "range" => self.range(&rest),
                "find" => self.find(&rest),
                "filter" => self.filter(&rest),
                "config" => self.configure(&rest),
                "stats" => self.stats(),
                "clear" => {
                    if self.confirm("Delete every record and index? [y/N] ")? {
                        // a failed clear leaves no usable database behind
                        self = self.cleared()?;
                        println!("Database cleared.");
                    } else {
                        println!("Nothing deleted.");
                    }
                    Ok(())
                }
                other => {
                    println!("Unknown command '{}'. Type HELP for commands.", other);
                    Ok(())
                }
            };

            if let Err(e) = result {
                eprintln!("Error: {:#}", e);
            }
        }

        self.db.sync()?;
        println!("Goodbye!");
        Ok(())
    }

    /// `None` at end of input.
    fn prompt(&mut self, text: &str) -> anyhow::Result<Option<String>> {
        print!("{}", text);
        io::stdout().flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    fn read(&mut self, args: &[&str]) -> anyhow::Result<()> {
        let [path] = args else {
            bail!("usage: READ <file.csv>");
        };
        let report = self.db.import_csv(path).with_context(|| format!("importing {}", path))?;

        println!("Import finished.");
        println!("  rows read:              {}", report.rows_read);
        println!("  records inserted:       {}", report.inserted);
        println!("  rows skipped:           {}", report.skipped);
        println!("  unknown state codes:    {}", report.state_rejected);
        println!("  invalid sequence keys:  {}", report.sequence_rejected);
        println!("  school locations:       {}", report.locations);
        println!("  answer keys:            {}", report.answer_keys);
        println!("  state index nodes:      {}", report.state_nodes);
        println!("  sequence trie nodes:    {}", report.trie_nodes);
        Ok(())
    }

    fn show(&mut self) -> anyhow::Result<()> {
        let total = self.db.record_count() as usize;
        if total == 0 {
            println!("No records.");
            return Ok(());
        }
        self.paginate("All records", total, |db, start, len| {
            (start..start + len)
                .map(|id| {
                    let id = id as RecordId;
                    let record = db.record(id)?.context("record vanished")?;
                    describe(db, id, &record)
                })
                .collect()
        })
    }

    fn list(&mut self, args: &[&str]) -> anyhow::Result<()> {
        let (field, order) = match args {
            [field] => (field.parse::<ScoreField>()?, SortOrder::Ascending),
            [field, order] => (field.parse::<ScoreField>()?, order.parse::<SortOrder>()?),
            _ => bail!("usage: LIST <cn|ch|lc|mt|red> [asc|desc]"),
        };

        let total = self.db.score_count(field) as usize;
        if total == 0 {
            println!("The {} score index is empty.", field);
            return Ok(());
        }
        let direction = match order {
            SortOrder::Ascending => "lowest first",
            SortOrder::Descending => "highest first",
        };
        let title = format!("Records by {} score ({})", field.label(), direction);
        // each page walks the leaf chain only as far as it needs
        self.paginate(&title, total, |db, start, len| {
            db.ranked_page(field, order, start, len)?
                .iter()
                .map(|entry| ranked_line(db, field, entry))
                .collect()
        })
    }

    fn range(&mut self, args: &[&str]) -> anyhow::Result<()> {
        let [field, low, high] = args else {
            bail!("usage: RANGE <field> <low> <high>");
        };
        let field: ScoreField = field.parse()?;
        let low: f32 = low.parse().with_context(|| format!("'{}' is not a number", low))?;
        let high: f32 = high.parse().with_context(|| format!("'{}' is not a number", high))?;

        let entries = self.db.score_range(field, low, high)?;
        if entries.is_empty() {
            println!("No {} scores between {} and {}.", field, low, high);
            return Ok(());
        }
        let title = format!("{} scores from {} to {}", field.label(), low, high);
        self.paginate(&title, entries.len(), |db, start, len| {
            entries[start..start + len]
                .iter()
                .map(|entry| ranked_line(db, field, entry))
                .collect()
        })
    }

    fn find(&mut self, args: &[&str]) -> anyhow::Result<()> {
        let [sequence] = args else {
            bail!("usage: FIND <sequence>");
        };
        match self.db.find_by_sequence(sequence)? {
            Some((id, record)) => println!("{}", describe(&mut self.db, id, &record)?),
            None => println!("No record with sequence '{}'.", sequence),
        }
        Ok(())
    }

    fn filter(&mut self, args: &[&str]) -> anyhow::Result<()> {
        let [state] = args else {
            bail!("usage: FILTER <UF>");
        };
        let state = state.to_ascii_uppercase();
        let records = self.db.list_by_state(&state)?;
        if records.is_empty() {
            println!("No records for state {}.", state);
            return Ok(());
        }
        let title = format!("Records from {}", state);
        self.paginate(&title, records.len(), |_, start, len| {
            Ok(records[start..start + len]
                .iter()
                .map(|(id, record)| {
                    format!(
                        "#{} seq {} | CN {:.2} | essay {:.2}",
                        id, record.sequence, record.score_cn, record.score_essay
                    )
                })
                .collect())
        })
    }

    fn configure(&mut self, args: &[&str]) -> anyhow::Result<()> {
        let [per_page] = args else {
            println!("Records per page: {}", self.db.config().records_per_page);
            return Ok(());
        };
        let per_page: usize = per_page
            .parse()
            .with_context(|| format!("'{}' is not a page size", per_page))?;
        self.db.set_records_per_page(per_page)?;
        println!("Records per page set to {}.", per_page);
        Ok(())
    }

    fn stats(&mut self) -> anyhow::Result<()> {
        let stats = self.db.stats()?;
        println!("Records:          {}", stats.records);
        println!("School locations: {}", stats.locations);
        println!("Answer keys:      {}", stats.answer_keys);
        println!("Trie nodes:       {}", stats.trie_nodes);
        println!("State index nodes: {}", stats.state_nodes);
        println!();
        println!("{:<6} {:>10} {:>8} {:>10} {:>7}", "field", "entries", "leaves", "internal", "height");
        for (field, tree) in &stats.trees {
            println!(
                "{:<6} {:>10} {:>8} {:>10} {:>7}",
                field.code(),
                tree.entries,
                tree.leaf_nodes,
                tree.internal_nodes,
                tree.height
            );
        }
        Ok(())
    }

    fn confirm(&mut self, question: &str) -> anyhow::Result<bool> {
        Ok(self
            .prompt(question)?
            .is_some_and(|answer| answer.eq_ignore_ascii_case("y")))
    }

    fn cleared(self) -> anyhow::Result<Self> {
        let Shell { db, input } = self;
        let db = db.clear().context("clearing database")?;
        Ok(Shell { db, input })
    }

    /// Show `total` rows one page at a time until the user goes back.
    ///
    /// `page_lines(db, start, len)` renders rows `start..start + len`; only
    /// the page on screen is fetched.
    fn paginate(
        &mut self,
        title: &str,
        total: usize,
        mut page_lines: impl FnMut(&mut ExamDB, usize, usize) -> anyhow::Result<Vec<String>>,
    ) -> anyhow::Result<()> {
        let per_page = self.db.config().records_per_page;
        let pages = total.div_ceil(per_page);
        let mut page = 0;

        loop {
            let start = page * per_page;
            let end = (start + per_page).min(total);
            println!("---------------------------------------------------------------");
            println!("{}", title);
            println!("---------------------------------------------------------------");
            for (i, line) in page_lines(&mut self.db, start, end - start)?.iter().enumerate() {
                println!("{:>6}. {}", start + i + 1, line);
            }
            println!(
                "Page {} of {} (records {}-{} of {})",
                page + 1,
                pages,
                start + 1,
                end,
                total
            );
            if pages == 1 {
                return Ok(());
            }

            let Some(answer) = self.prompt("[n]ext, [p]revious, page number, or back: ")? else {
                return Ok(());
            };
            match answer.to_ascii_lowercase().as_str() {
                "back" | "b" | "q" => return Ok(()),
                "n" | "next" | "" => page = (page + 1).min(pages - 1),
                "p" | "prev" | "previous" => page = page.saturating_sub(1),
                other => match other.parse::<usize>() {
                    Ok(n) if (1..=pages).contains(&n) => page = n - 1,
                    _ => println!("Enter n, p, back or a page between 1 and {}.", pages),
                },
            }
        }
    }
}

/// One ranked listing line: score, school and sequence.
fn ranked_line(db: &mut ExamDB, field: ScoreField, entry: &LeafEntry) -> anyhow::Result<String> {
    let record = db
        .record(entry.record_id)?
        .with_context(|| format!("index entry points at missing record {}", entry.record_id))?;
    let school = match db.location(record.location_id)? {
        Some(loc) => format!("{} ({}/{})", loc.school_code, loc.city, loc.state),
        None => "unknown school".to_string(),
    };
    Ok(format!(
        "{} {:>7.2} | school {} | seq {}",
        field.code(),
        entry.score,
        school,
        record.sequence
    ))
}

/// Multi-line description of a record with its lookup-table values.
fn describe(db: &mut ExamDB, id: RecordId, record: &ExamRecord) -> anyhow::Result<String> {
    let location = match db.location(record.location_id)? {
        Some(loc) => format!("{} ({}/{})", loc.school_code, loc.city, loc.state),
        None => "not found".to_string(),
    };

    let mut exams = Vec::with_capacity(record.answer_key_ids.len());
    for (field, &key_id) in ScoreField::ALL.iter().zip(record.answer_key_ids.iter()) {
        let code = db
            .answer_key(key_id)?
            .map(|key| key.exam_code)
            .unwrap_or_else(|| "N/A".to_string());
        exams.push(format!("{} {}", field.code(), code));
    }

    Ok(format!(
        "record {} | seq {} | year {}\n    school: {}\n    exams: {} | language: {}\n    scores: CN {:.2} | CH {:.2} | LC {:.2} | MT {:.2} | essay {:.2}",
        id,
        record.sequence,
        record.year,
        location,
        exams.join(", "),
        record.language_name(),
        record.score_cn,
        record.score_ch,
        record.score_lc,
        record.score_mt,
        record.score_essay
    ))
}
