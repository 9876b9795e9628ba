//! `dexprep-cli --dex <build-number> <cache-fd> <image-off> <image-len>
//! <src-name> <src-mtime> <src-crc> <flags> [bootclasspath-entry ...]`
//!
//! The cache-build subprocess entry point: the caller already holds the
//! cache file open (and locked) on `cache-fd` with the raw, not-yet-linked
//! image written at `[image-off, image-off+image-len)`. This process
//! prepares that image and finalizes the container in place.

use std::io::{Read, Seek, SeekFrom};
use std::process::ExitCode;

use clap::{Arg, Command};
use sha1::{Digest, Sha1};

use dexprep_image::container::{BootClasspathEntry, DependencyManifest};
use dexprep_vm::context::PrepareConfig;
use dexprep_vm::error::PrepareError;

fn cli() -> Command {
    Command::new("dexprep-cli")
        .about("Builds a prepared cache container from a raw class image")
        .arg(Arg::new("dex").long("dex").required(true).num_args(0).help("selects the cache-build subcommand"))
        .arg(Arg::new("build-number").required(true).index(1))
        .arg(Arg::new("cache-fd").required(true).index(2))
        .arg(Arg::new("image-off").required(true).index(3))
        .arg(Arg::new("image-len").required(true).index(4))
        .arg(Arg::new("src-name").required(true).index(5))
        .arg(Arg::new("src-mtime").required(true).index(6))
        .arg(Arg::new("src-crc").required(true).index(7))
        .arg(Arg::new("flags").required(true).index(8))
        .arg(Arg::new("boot-classpath").num_args(0..).index(9))
}

fn parse_u32(matches: &clap::ArgMatches, id: &str) -> Result<u32, String> {
    matches
        .get_one::<String>(id)
        .ok_or_else(|| format!("missing argument {id}"))?
        .parse()
        .map_err(|e| format!("argument {id} is not a valid number: {e}"))
}

fn parse_u64(matches: &clap::ArgMatches, id: &str) -> Result<u64, String> {
    matches
        .get_one::<String>(id)
        .ok_or_else(|| format!("missing argument {id}"))?
        .parse()
        .map_err(|e| format!("argument {id} is not a valid number: {e}"))
}

fn sha1_of_file(path: &str) -> std::io::Result<[u8; 20]> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha1::new();
    std::io::copy(&mut file, &mut hasher)?;
    let digest = hasher.finalize();
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    Ok(out)
}

fn run() -> Result<(), String> {
    let matches = cli().get_matches();

    let vm_build_number = parse_u32(&matches, "build-number")?;
    let cache_fd: i32 = matches
        .get_one::<String>("cache-fd")
        .unwrap()
        .parse()
        .map_err(|e| format!("cache-fd is not a valid descriptor: {e}"))?;
    let image_off = parse_u64(&matches, "image-off")?;
    let image_len = parse_u64(&matches, "image-len")?;
    let src_name = matches.get_one::<String>("src-name").unwrap().clone();
    let src_mtime = parse_u64(&matches, "src-mtime")?;
    let src_crc = parse_u32(&matches, "src-crc")?;
    let flags = parse_u32(&matches, "flags")?;
    let boot_classpath: Vec<String> = matches
        .get_many::<String>("boot-classpath")
        .map(|vals| vals.cloned().collect())
        .unwrap_or_default();

    tracing::info!(%src_name, vm_build_number, "preparing class image");

    let config = PrepareConfig::from_flag_word(flags, vm_build_number, boot_classpath.clone());

    let mut boot_classpath_entries = Vec::with_capacity(boot_classpath.len());
    for entry in &boot_classpath {
        let sha1 = sha1_of_file(entry).map_err(|e| format!("reading boot classpath entry {entry}: {e}"))?;
        boot_classpath_entries.push(BootClasspathEntry { name: entry.clone(), sha1 });
    }
    let manifest = DependencyManifest {
        source_mtime: src_mtime,
        source_crc: src_crc,
        vm_build_number,
        boot_classpath: boot_classpath_entries,
    };

    #[cfg(unix)]
    {
        use std::os::unix::io::FromRawFd;
        let file = unsafe { std::fs::File::from_raw_fd(cache_fd) };
        let mut lock = dexprep_vm::cache::FileLock::acquire(file).map_err(|e| e.to_string())?;

        lock.file().seek(SeekFrom::Start(image_off)).map_err(|e| e.to_string())?;
        let mut image = vec![0u8; image_len as usize];
        lock.file().read_exact(&mut image).map_err(|e| e.to_string())?;

        let prepared = dexprep_vm::pipeline::prepare_image(&image, &config).map_err(|e| e.to_string())?;
        dexprep_vm::cache::write_container(&mut lock, &prepared.bytes, &manifest, &prepared.opt_chunks)
            .map_err(|e: PrepareError| e.to_string())?;

        Ok(())
    }

    #[cfg(not(unix))]
    {
        let _ = (cache_fd, image_off, image_len, manifest, config);
        Err("the cache-build subprocess requires a Unix target".to_string())
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(reason) => {
            tracing::error!(%reason, "cache build failed");
            ExitCode::FAILURE
        }
    }
}
