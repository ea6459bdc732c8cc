use clap::Parser as ClapParser;
use std::{
    collections::HashMap,
    fs,
    io::{self, BufRead, Write},
    process,
};

use twospace::{Address, FitStrategy, Handle, Heap, HeapSettings};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Script files to execute in order
    #[arg(required = false, help = "Command scripts to run")]
    files: Vec<String>,

    /// Bytes per arena
    #[arg(long, default_value_t = 1024)]
    size: usize,

    /// Placement strategy
    #[arg(long, default_value = "first", help = "first or best")]
    strategy: String,

    /// Start REPL after executing files (default if no files)
    #[arg(long, help = "Force REPL mode after script execution")]
    repl: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Alloc(usize),
    Free(usize),
    New(usize),
    Release(usize),
    Write(usize, String),
    Read(usize),
    Collect,
    Dump,
    Stats,
    Init(FitStrategy),
    Help,
    Exit,
}

const HELP: &str = "\
alloc N         raw allocation of N bytes
free OFFSET     free a raw allocation (decimal or 0x hex)
new N           managed allocation of N bytes
release H       release handle H
write H TEXT    store TEXT in the object behind H
read H          print the object behind H
collect         run one evacuation
dump            print blocks, free list and handles
stats           print occupancy numbers
init first|best wipe the heap and pick a strategy
exit";

fn parse_number(token: Option<&str>, what: &str) -> Result<usize, String> {
    let token = token.ok_or_else(|| format!("missing {what}"))?;
    let token = token.trim_start_matches('#');
    let parsed = match token.strip_prefix("0x") {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => token.parse(),
    };
    parsed.map_err(|_| format!("invalid {what} '{token}'"))
}

fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with("//") {
        return Ok(None);
    }
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim_start();
    let mut args = rest.split_whitespace();

    let command = match word {
        "alloc" => Command::Alloc(parse_number(args.next(), "size")?),
        "free" => Command::Free(parse_number(args.next(), "offset")?),
        "new" => Command::New(parse_number(args.next(), "size")?),
        "release" => Command::Release(parse_number(args.next(), "handle")?),
        "write" => {
            let handle = parse_number(args.next(), "handle")?;
            let text = rest
                .split_once(char::is_whitespace)
                .map(|(_, text)| text.trim_start())
                .unwrap_or("");
            Command::Write(handle, text.to_string())
        }
        "read" => Command::Read(parse_number(args.next(), "handle")?),
        "collect" => Command::Collect,
        "dump" => Command::Dump,
        "stats" => Command::Stats,
        "init" => {
            let strategy = args.next().ok_or("missing strategy")?;
            Command::Init(strategy.parse().map_err(|e| format!("{e}"))?)
        }
        "help" => Command::Help,
        "exit" | "quit" => Command::Exit,
        other => return Err(format!("unknown command '{other}'")),
    };
    Ok(Some(command))
}

/// Interactive state: the heap plus the names the user refers to.
struct Session {
    heap: Heap,
    raw: HashMap<usize, Address>,
    handles: Vec<Handle>,
}

impl Session {
    fn new(heap: Heap) -> Self {
        Self {
            heap,
            raw: HashMap::new(),
            handles: Vec::new(),
        }
    }

    fn handle(&self, index: usize) -> Result<Handle, String> {
        self.handles
            .get(index)
            .copied()
            .ok_or_else(|| format!("no handle #{index}"))
    }

    fn execute(&mut self, command: Command) -> Result<String, String> {
        let heap = &mut self.heap;
        let output = match command {
            Command::Alloc(size) => {
                let address = heap.allocate(size).map_err(|e| e.to_string())?;
                self.raw.insert(address.offset(), address);
                format!("{address}")
            }
            Command::Free(offset) => {
                let address = self
                    .raw
                    .remove(&offset)
                    .ok_or_else(|| format!("no raw allocation at {offset:#06x}"))?;
                heap.free(address).map_err(|e| e.to_string())?;
                String::new()
            }
            Command::New(size) => {
                let handle = heap.managed_allocate(size).map_err(|e| e.to_string())?;
                self.handles.push(handle);
                format!("{handle}")
            }
            Command::Release(index) => {
                let handle = self.handle(index)?;
                self.heap.managed_free(handle).map_err(|e| e.to_string())?;
                String::new()
            }
            Command::Write(index, text) => {
                let handle = self.handle(index)?;
                self.heap
                    .write_handle(handle, text.as_bytes())
                    .map_err(|e| e.to_string())?;
                String::new()
            }
            Command::Read(index) => {
                let handle = self.handle(index)?;
                let bytes = self.heap.handle_bytes(handle).map_err(|e| e.to_string())?;
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                String::from_utf8_lossy(&bytes[..end]).into_owned()
            }
            Command::Collect => {
                let stats = heap.collect().map_err(|e| e.to_string())?;
                self.raw.clear();
                format!(
                    "{} survivors, {} bytes copied, {} bytes reclaimed",
                    stats.survivors, stats.bytes_copied, stats.bytes_reclaimed
                )
            }
            Command::Dump => heap.dump().to_string(),
            Command::Stats => format!("{:#?}", heap.stats()),
            Command::Init(strategy) => {
                heap.managed_init(strategy);
                self.raw.clear();
                self.handles.clear();
                format!("heap reset, {strategy}")
            }
            Command::Help => HELP.to_string(),
            Command::Exit => String::new(),
        };
        Ok(output)
    }

    /// Runs one line. Returns false once the user asked to leave.
    fn run_line(&mut self, line: &str) -> bool {
        match parse_command(line) {
            Ok(Some(Command::Exit)) => return false,
            Ok(Some(command)) => match self.execute(command) {
                Ok(output) if output.is_empty() => {}
                Ok(output) => println!("{}", output.trim_end()),
                Err(err) => eprintln!("Error: {err}"),
            },
            Ok(None) => {}
            Err(err) => eprintln!("Error: {err}"),
        }
        true
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let strategy = match cli.strategy.parse::<FitStrategy>() {
        Ok(strategy) => strategy,
        Err(err) => {
            eprintln!("Error: {err}");
            process::exit(1);
        }
    };
    let heap = match Heap::new(HeapSettings {
        arena_size: cli.size,
        strategy,
    }) {
        Ok(heap) => heap,
        Err(err) => {
            eprintln!("Error: {err}");
            process::exit(1);
        }
    };
    let mut session = Session::new(heap);

    for filename in &cli.files {
        let script = match fs::read_to_string(filename) {
            Ok(content) => content,
            Err(err) => {
                eprintln!("Error reading file '{}': {}", filename, err);
                process::exit(1);
            }
        };
        for line in script.lines() {
            if !session.run_line(line) {
                return;
            }
        }
    }

    if cli.repl || cli.files.is_empty() {
        run_repl(&mut session);
    }
}

fn run_repl(session: &mut Session) {
    println!("twospace heap REPL, 'help' lists commands");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut input = String::new();

    loop {
        print!("> ");
        if let Err(err) = stdout.flush() {
            eprintln!("Error flushing stdout: {}", err);
            break;
        }

        input.clear();
        match stdin.lock().read_line(&mut input) {
            Ok(0) => break,
            Ok(_) => {
                if !session.run_line(&input) {
                    break;
                }
            }
            Err(err) => {
                eprintln!("Error reading input: {}", err);
                break;
            }
        }
    }
}
