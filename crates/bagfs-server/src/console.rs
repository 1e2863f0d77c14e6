//! A line-oriented [`DriveHost`] for platforms without a native
//! filesystem-driver binding.
//!
//! `mount` serves a small shell on the given reader and writer until the
//! operator types `exit`, the input ends, or `unmount` is called. Browse
//! commands go through the driver callbacks exactly as an OS host would
//! issue them; admin commands go to [`Admin`].

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bagfs_kernel::driver::{DriveHost, DriverOps, FileContext, HostError, free_drive_letters};
use bagfs_kernel::{DriverStatus, OpenFlags};
use parking_lot::Mutex;

use crate::admin::Admin;

const READ_CHUNK: usize = 64 * 1024;

const HELP: &str = "\
browse:
  ls [path]               list a virtual directory
  info <path>             show file information
  cat <path>              print a virtual file
  df                      volume label and free space
admin:
  volumes                 list bag volumes
  stat <volume>           show one bag volume
  add <directory>         create a bag in a directory
  remove <volume>         forget a bag
  sync <volume> on|off    toggle live sync
  resync <volume>         rebuild a catalog
  exit                    unmount and quit
";

type Input = Box<dyn BufRead + Send>;
type Output = Box<dyn Write + Send>;

pub struct ConsoleHost {
    input: Mutex<Input>,
    output: Mutex<Output>,
    admin: Option<Admin>,
    drive_ids: Vec<String>,
    mounted: Mutex<Option<String>>,
    stop: AtomicBool,
}

impl ConsoleHost {
    pub fn new(input: Input, output: Output, drive_ids: Vec<String>) -> Self {
        Self {
            input: Mutex::new(input),
            output: Mutex::new(output),
            admin: None,
            drive_ids,
            mounted: Mutex::new(None),
            stop: AtomicBool::new(false),
        }
    }

    /// Console on the process's stdin and stdout, offering the drive
    /// letters no attached disk uses.
    pub fn stdio() -> Self {
        let disks = sysinfo::Disks::new_with_refreshed_list();
        let in_use: Vec<String> = disks
            .list()
            .iter()
            .map(|d| d.mount_point().to_string_lossy().into_owned())
            .collect();
        Self::new(
            Box::new(io::BufReader::new(io::stdin())),
            Box::new(io::stdout()),
            free_drive_letters(&in_use),
        )
    }

    pub fn with_admin(mut self, admin: Admin) -> Self {
        self.admin = Some(admin);
        self
    }

    pub fn mounted_drive(&self) -> Option<String> {
        self.mounted.lock().clone()
    }

    fn serve(&self, drive: &str, driver: &dyn DriverOps) -> io::Result<()> {
        let mut line = String::new();
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return Ok(());
            }
            {
                let mut out = self.output.lock();
                write!(out, "{drive}> ")?;
                out.flush()?;
            }

            line.clear();
            if self.input.lock().read_line(&mut line)? == 0 {
                return Ok(());
            }
            let command = line.trim();
            if command.is_empty() {
                continue;
            }
            if matches!(command, "exit" | "quit") {
                return Ok(());
            }

            let mut out = self.output.lock();
            if command == "help" {
                out.write_all(HELP.as_bytes())?;
                continue;
            }
            if let Some(result) = self.admin.as_ref().and_then(|admin| admin.execute(command)) {
                match result {
                    Ok(text) => out.write_all(text.as_bytes())?,
                    Err(e) => writeln!(out, "error: {e}")?,
                }
                continue;
            }
            browse(command, driver, &mut *out)?;
        }
    }
}

/// One browse command against the driver.
fn browse(command: &str, driver: &dyn DriverOps, out: &mut dyn Write) -> io::Result<()> {
    let (verb, arg) = match command.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (command, ""),
    };
    let path = if arg.is_empty() { "\\" } else { arg };
    let ctx = FileContext::new();

    match verb {
        "ls" => match driver.find_files(path, &ctx) {
            Ok(entries) => {
                for info in entries {
                    if info.is_dir() {
                        writeln!(out, "{:>12}  {}", "<DIR>", info.file_name)?;
                    } else {
                        writeln!(out, "{:>12}  {}", info.size, info.file_name)?;
                    }
                }
            }
            Err(status) => report(out, status)?,
        },
        "info" => match driver.get_file_information(path, &ctx) {
            Ok(info) => {
                writeln!(out, "name:     {}", info.file_name)?;
                writeln!(out, "kind:     {:?}", info.kind)?;
                writeln!(out, "size:     {}", info.size)?;
                writeln!(out, "created:  {}", info.created)?;
                writeln!(out, "modified: {}", info.modified)?;
                writeln!(out, "accessed: {}", info.accessed)?;
            }
            Err(status) => report(out, status)?,
        },
        "cat" => {
            if let Err(status) = driver.create_file(path, OpenFlags::read(), &ctx) {
                report(out, status)?;
                return Ok(());
            }
            let mut buf = vec![0u8; READ_CHUNK];
            let mut offset = 0u64;
            loop {
                match driver.read_file(path, &mut buf, offset, &ctx) {
                    Ok(0) => break,
                    Ok(n) => {
                        out.write_all(&buf[..n])?;
                        offset += n as u64;
                    }
                    Err(status) => {
                        report(out, status)?;
                        break;
                    }
                }
            }
            driver.cleanup(path, &ctx);
            driver.close_file(path, &ctx);
            writeln!(out)?;
        }
        "df" => {
            match driver.get_volume_information() {
                Ok(info) => writeln!(out, "{} ({})", info.label, info.filesystem_name)?,
                Err(status) => report(out, status)?,
            }
            match driver.get_disk_free_space() {
                Ok(space) => writeln!(
                    out,
                    "{} bytes free of {}",
                    space.free_bytes_available, space.total_bytes
                )?,
                Err(status) => report(out, status)?,
            }
        }
        _ => writeln!(out, "unknown command: {verb} (try help)")?,
    }
    Ok(())
}

fn report(out: &mut dyn Write, status: DriverStatus) -> io::Result<()> {
    writeln!(out, "error: {status} ({:#010x})", status.code())
}

impl DriveHost for ConsoleHost {
    fn free_drive_ids(&self) -> Vec<String> {
        self.drive_ids.clone()
    }

    fn mount(&self, drive: &str, driver: Arc<dyn DriverOps>) -> Result<(), HostError> {
        {
            let mut mounted = self.mounted.lock();
            if let Some(current) = mounted.as_ref() {
                return Err(HostError::DriveInUse(current.clone()));
            }
            *mounted = Some(drive.to_string());
        }
        self.stop.store(false, Ordering::SeqCst);

        if let Err(status) = driver.mounted() {
            *self.mounted.lock() = None;
            return Err(HostError::Mount(status.to_string()));
        }
        tracing::info!(drive, "console drive mounted");

        let served = self.serve(drive, driver.as_ref());
        if let Err(status) = driver.unmounted() {
            tracing::warn!(drive, %status, "driver reported unmount failure");
        }
        *self.mounted.lock() = None;
        tracing::info!(drive, "console drive unmounted");
        served.map_err(HostError::from)
    }

    /// Takes effect before the next prompt; a pending read is not interrupted.
    fn unmount(&self, drive: &str) -> Result<(), HostError> {
        match self.mounted.lock().as_deref() {
            Some(current) if current == drive => {
                self.stop.store(true, Ordering::SeqCst);
                Ok(())
            }
            _ => Err(HostError::NotMounted(drive.to_string())),
        }
    }
}
