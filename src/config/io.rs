use std::env::current_exe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use directories_next::ProjectDirs;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::spawn;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use serde_json;
use fd_lock::{RwLock, RwLockWriteGuard};
use log::{error, info, warn};
use std::fs::OpenOptions;
use std::str;

use crate::config::types::{Config, SavedDevice};
use crate::error::ConfigError;

/// Persistence of the saved device list as seen by the connection coordinator. Saving is fire
/// and forget; failures are logged by the implementation.
pub trait PersistenceGateway {
    fn save_saved_devices(&self, devices: Vec<SavedDevice>);
}

// creates a path to a json file next to the executable, with the same name
// this could be useful for usb sticks
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            // F:\ble-midi-bridge.exe => F:\ble-midi-bridge.json
            if !path.set_extension("json") {
                warn!("current exe has no filename: {}", path.to_string_lossy());
                return None
            }

            Some(path)
        },
        Err(err) => {
            warn!("failed to get current exe path: {:?}", err);
            None
        },
    }
}

// creates a path to ble-midi-bridge.json in an os dependent standard directory, such as %AppData% on
// windows.
fn get_local_config_path() -> Option<PathBuf> {
    ProjectDirs::from("nl", "blemidi", "ble-midi-bridge").map(|dirs| {
        dirs.config_dir().join("ble-midi-bridge.json")
    })
}

fn get_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = get_portable_config_path() {
        if let Ok(attr) = std::fs::metadata(&path) {
            if attr.is_file() {
                return Ok(path);
            }
        }
    }

    match get_local_config_path() {
        None => Err(ConfigError::NoConfigPath),
        Some(path) => Ok(path),
    }
}

pub struct ConfigIOLocker {
    rw_lock: RwLock<std::fs::File>,
}

impl ConfigIOLocker {
    pub fn lock(&mut self) -> Result<RwLockWriteGuard<std::fs::File>, ConfigError> {
        match self.rw_lock.try_write() {
            Ok(guard) => Ok(guard),
            Err(source) => Err(ConfigError::CanNotLock { source }),
        }
    }
}

struct ConfigIOInner {
    file: std::fs::File,
}

#[derive(Clone)]
pub struct ConfigIO {
    inner: Arc<Mutex<ConfigIOInner>>,
    path: PathBuf,
}

impl ConfigIO {
    /// Open the config file at `path_override`, or at the default location.
    pub fn new_sync(path_override: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = match path_override {
            Some(path) => path,
            None => get_config_path()?,
        };
        Self::open(&path)
    }

    pub fn open(path: &Path) -> Result<Self, ConfigError> {
        info!("Using config file {}", path.to_string_lossy());

        if let Some(directory) = path.parent() {
            std::fs::create_dir_all(directory)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .truncate(false)
            .append(false)
            .create(true)
            .open(path)?;

        let inner = ConfigIOInner {
            file,
        };
        Ok(ConfigIO { inner: Arc::new(Mutex::new(inner)), path: path.to_path_buf() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The returned locker must be kept alive, together with the guard it hands out, for as long
    /// as this instance owns the config file.
    pub fn locker(&mut self) -> Result<ConfigIOLocker, ConfigError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        Ok(ConfigIOLocker {
            rw_lock: RwLock::new(inner.file.try_clone()?),
        })
    }

    // The File returned from here should never be closed!
    fn get_file(&self) -> Result<File, ConfigError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let file = inner.file.try_clone()?; // std File
        Ok(File::from_std(file)) // tokio File
    }

    pub async fn read(&self) -> Result<Config, ConfigError> {
        let mut file = self.get_file()?;
        info!("Reading config file");

        let mut content = vec![];
        file.rewind().await?;
        file.read_to_end(&mut content).await?;

        if content.is_empty() {
            return Ok(Config::default());
        }

        let content = str::from_utf8(&content)?;

        let mut config: Config = serde_json::from_str(content)?;
        config.dedup_devices();
        Ok(config)
    }

    /// Like `read`, but never fails: a missing, empty or corrupt file yields no devices.
    pub async fn load_saved_devices(&self) -> Vec<SavedDevice> {
        match self.read().await {
            Ok(config) => config.devices,
            Err(err) if err.is_file_not_found_error() => {
                info!("Config file not found, starting without saved devices");
                Vec::new()
            },
            Err(err) => {
                warn!("Failed to load config, starting without saved devices: {}", err);
                Vec::new()
            },
        }
    }

    pub async fn save(&self, config: Config) -> Result<(), ConfigError> {
        let mut file = self.get_file()?;
        info!("Saving config");

        let content = serde_json::to_string_pretty(&config)?;
        file.rewind().await?;
        file.set_len(0).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Handle to the persistence task. Saves are written one at a time, in the order they were
/// requested.
#[derive(Clone)]
pub struct ConfigSaver {
    sender: UnboundedSender<Config>,
}

impl PersistenceGateway for ConfigSaver {
    fn save_saved_devices(&self, devices: Vec<SavedDevice>) {
        if self.sender.send(Config { devices }).is_err() {
            error!("Persistence task has stopped; saved devices were not written");
        }
    }
}

/// Spawns the task that writes configs to disk. The task drains pending saves before it stops
/// after `cancel`.
pub fn persistence_task(config_io: ConfigIO, cancel: CancellationToken) -> (ConfigSaver, JoinHandle<()>) {
    let (sender, mut receiver) = unbounded_channel::<Config>();

    let handle = spawn(async move {
        'mainloop: loop {
            tokio::select! {
                biased;
                config = receiver.recv() => match config {
                    Some(config) => {
                        if let Err(err) = config_io.save(config).await {
                            error!("Failed to save config: {:?}", err);
                        }
                    },
                    None => break 'mainloop,
                },
                _ = cancel.cancelled() => {
                    receiver.close();
                    while let Some(config) = receiver.recv().await {
                        if let Err(err) = config_io.save(config).await {
                            error!("Failed to save config: {:?}", err);
                        }
                    }
                    break 'mainloop;
                },
            }
        }
    });

    (ConfigSaver { sender }, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::types::PeerId;

    fn device(name: &str, identifier: &str) -> SavedDevice {
        SavedDevice { name: name.to_string(), identifier: PeerId::new(identifier) }
    }

    #[tokio::test]
    async fn empty_file_reads_as_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_io = ConfigIO::open(&dir.path().join("nested").join("bridge.json")).expect("open");
        assert_eq!(config_io.read().await.expect("read"), Config::default());
    }

    #[tokio::test]
    async fn save_then_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_io = ConfigIO::open(&dir.path().join("bridge.json")).expect("open");

        let config = Config { devices: vec![device("Keys", "1"), device("Pads", "2")] };
        config_io.save(config.clone()).await.expect("save");
        assert_eq!(config_io.read().await.expect("read"), config);

        // a shorter config must not leave trailing bytes behind
        let config = Config { devices: vec![device("K", "1")] };
        config_io.save(config.clone()).await.expect("save");
        assert_eq!(config_io.read().await.expect("read"), config);
    }

    #[tokio::test]
    async fn corrupt_file_loads_no_devices() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bridge.json");
        std::fs::write(&path, "{ not json").expect("write");

        let config_io = ConfigIO::open(&path).expect("open");
        assert!(config_io.read().await.is_err());
        assert!(config_io.load_saved_devices().await.is_empty());
    }

    #[tokio::test]
    async fn second_lock_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bridge.json");

        let mut first = ConfigIO::open(&path).expect("open");
        let mut first_locker = first.locker().expect("locker");
        let _guard = first_locker.lock().expect("lock");

        let mut second = ConfigIO::open(&path).expect("open");
        let mut second_locker = second.locker().expect("locker");
        assert!(matches!(second_locker.lock(), Err(ConfigError::CanNotLock { .. })));
    }

    #[tokio::test]
    async fn persistence_task_writes_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_io = ConfigIO::open(&dir.path().join("bridge.json")).expect("open");
        let cancel = CancellationToken::new();
        let (saver, handle) = persistence_task(config_io.clone(), cancel.clone());

        saver.save_saved_devices(vec![device("A", "1")]);
        saver.save_saved_devices(vec![device("A", "1"), device("B", "2")]);
        cancel.cancel();
        handle.await.expect("join persistence task");

        assert_eq!(config_io.load_saved_devices().await, vec![device("A", "1"), device("B", "2")]);
    }
}
