//! `e2sh` is an interactive explorer for ext2 disk images.
//!
//! It opens a disk image (or block device) holding an ext2 filesystem and
//! exposes a small shell over it: `ls`, `cd`, `pwd`, `cat`, `mkdir`,
//! `dumpe2fs` and `exit`.

use fsext2::{EntryData, FileType, Fs, Navigator};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::exit;
use std::{env, fmt, io};

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
    /// If true, print command line help.
    help: bool,
    /// The path to the disk image to explore.
    image_path: Option<PathBuf>,
}

fn parse_args() -> Args {
    let mut res: Args = Default::default();
    for arg in env::args_os().skip(1) {
        match arg.to_str() {
            Some("-h" | "--help") => res.help = true,
            _ => {
                res.image_path = Some(PathBuf::from(arg));
            }
        }
    }
    res
}

/// Writes an error to stderr, then exits.
fn error<M: fmt::Display>(msg: M) -> ! {
    eprintln!("e2sh: error: {msg}");
    exit(1);
}

/// Prints command usage.
fn print_usage() {
    eprintln!("Usage: e2sh <disk image>");
    eprintln!("Try 'e2sh --help' for more information.");
}

/// Prints command help.
fn print_help() {
    println!();
    println!("Usage:");
    println!(" e2sh [options] <disk image>");
    println!();
    println!("Opens an ext2 disk image and starts an interactive shell over it.");
    println!();
    println!("Options:");
    println!(" -h, --help\tPrints help.");
    println!();
    println!("Commands:");
    println!(" ls [path]\tLists the entries of a directory.");
    println!(" cd <path>\tChanges the current directory.");
    println!(" pwd\t\tPrints the current directory's path.");
    println!(" cat <file>\tPrints the content of a file.");
    println!(" mkdir <path>\tCreates a directory.");
    println!(" dumpe2fs\tPrints the filesystem's metadata.");
    println!(" exit\t\tLeaves the shell.");
}

/// Shows the prompt and reads one command line.
///
/// Returns `None` on end of input.
fn prompt(text: &str) -> Option<String> {
    print!("{text}");
    let _ = io::stdout().flush();
    io::stdin().lock().lines().next().and_then(|l| l.ok())
}

/// Prints the names of the current directory of `nav`, tab separated.
fn print_listing(nav: &Navigator) {
    let mut out = String::new();
    for name in nav.current().names() {
        out.push_str(name);
        out.push('\t');
    }
    println!("{}", out.trim_end());
}

/// `ls [path]`
fn cmd_ls(fs: &mut Fs, nav: &Navigator, path: Option<&str>) {
    match path {
        None => print_listing(nav),
        Some(path) => {
            let mut temp = nav.clone();
            match temp.navigate(fs, path) {
                Ok(()) => print_listing(&temp),
                Err(_) => println!("{path} is not a valid path"),
            }
        }
    }
}

/// `cat <file>`
fn cmd_cat(fs: &mut Fs, nav: &Navigator, path: &str) {
    match nav.entry(fs, path) {
        Ok(entry) => match entry.data {
            EntryData::File(data) => {
                let _ = io::stdout().write_all(&data);
            }
            _ => println!("{path} is not a file"),
        },
        Err(_) => println!("{path} is not a valid path"),
    }
}

/// `mkdir <path>`
///
/// The final path component is created in the directory the rest of the path
/// resolves to.
fn cmd_mkdir(fs: &mut Fs, nav: &Navigator, path: &str) -> bool {
    let (dir_part, name) = match path.rfind('/') {
        Some(i) => (&path[..i.max(1)], &path[i + 1..]),
        None => ("", path),
    };
    if name.is_empty() {
        println!("{path} is not a valid path");
        return false;
    }
    let mut temp = nav.clone();
    if temp.navigate(fs, dir_part).is_err() {
        println!("{path} is not a valid path");
        return false;
    }
    match temp.current_mut().add_entry(fs, name, FileType::Directory) {
        Ok(_) => true,
        Err(e) => {
            println!("cannot create {path}: {e}");
            false
        }
    }
}

/// Reloads the navigator's directories after a mutation, keeping its
/// position.
fn refresh(fs: &mut Fs, nav: &mut Navigator) {
    let path = nav.path_string();
    if let Ok(mut fresh) = fs.navigator() {
        if fresh.navigate(fs, &path).is_ok() {
            *nav = fresh;
        }
    }
}

fn main() {
    env_logger::init();

    let args = parse_args();
    if args.help {
        print_help();
        exit(0);
    }
    let Some(image_path) = args.image_path else {
        print_usage();
        exit(1);
    };

    let mut fs = Fs::open(&image_path)
        .unwrap_or_else(|e| error(format_args!("{}: {e}", image_path.display())));
    let mut nav = fs
        .navigator()
        .unwrap_or_else(|e| error(format_args!("cannot read the root directory: {e}")));

    while let Some(line) = prompt(&format!("user@machine:{}$ ", nav.path_string())) {
        let mut words = line.split_whitespace();
        let Some(cmd) = words.next() else {
            continue;
        };
        let arg = words.next();
        match cmd {
            "exit" => break,
            "ls" => cmd_ls(&mut fs, &nav, arg),
            "cd" => match arg {
                None => println!("Usage: cd <path>"),
                Some(path) => {
                    if nav.navigate(&mut fs, path).is_err() {
                        println!("{path} is not a valid path");
                    }
                }
            },
            "pwd" => println!("{}", nav.path_string()),
            "cat" => match arg {
                None => println!("Usage: cat <file>"),
                Some(path) => cmd_cat(&mut fs, &nav, path),
            },
            "mkdir" => match arg {
                None => println!("Usage: mkdir <path>"),
                Some(path) => {
                    if cmd_mkdir(&mut fs, &nav, path) {
                        refresh(&mut fs, &mut nav);
                    }
                }
            },
            "dumpe2fs" => match fs.dumpe2fs() {
                Ok(dump) => print!("{dump}"),
                Err(e) => println!("cannot dump the filesystem: {e}"),
            },
            _ => println!("Unknown command {cmd}"),
        }
    }
}
