use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::StorageError;

/// Ключ access token в долговременном хранилище.
pub const ACCESS_TOKEN_KEY: &str = "token";
/// Ключ refresh token в долговременном хранилище.
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Долговременное key/value хранилище токенов сессии.
///
/// Операции синхронные и быстрые (файл, память), поэтому не требуют `async`.
pub trait TokenStorage: Send + Sync {
    /// Читает значение по ключу. Пустое значение считается отсутствующим.
    fn load(&self, key: &str) -> Result<Option<String>, StorageError>;
    /// Сохраняет значение.
    fn save(&self, key: &str, value: &str) -> Result<(), StorageError>;
    /// Удаляет значение; отсутствие ключа не ошибка.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
/// Хранилище в памяти процесса. Подходит для тестов и одноразовых сессий.
pub struct MemoryTokenStorage {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryTokenStorage {
    /// Создаёт пустое хранилище.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStorage for MemoryTokenStorage {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values
            .get(key)
            .map(|raw| raw.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string))
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        Ok(())
    }
}

#[derive(Debug)]
/// Хранилище в JSON-файле (`{"token": "...", "refreshToken": "..."}`).
///
/// Отсутствующий файл читается как пустое хранилище; после удаления последнего
/// ключа файл удаляется.
pub struct FileTokenStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileTokenStorage {
    /// Создаёт хранилище поверх файла `path`. Файл создаётся при первой записи.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Путь к файлу хранилища.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StorageError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    fn write_all(&self, values: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if values.is_empty() {
            if self.path.exists() {
                fs::remove_file(&self.path)?;
            }
            return Ok(());
        }

        let raw = serde_json::to_string_pretty(values)?;
        fs::write(&self.path, raw)?;
        Ok(())
    }
}

impl TokenStorage for FileTokenStorage {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut values = self.read_all()?;
        Ok(values
            .remove(key)
            .map(|raw| raw.trim().to_string())
            .filter(|value| !value.is_empty()))
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut values = self.read_all()?;
        values.insert(key.to_string(), value.to_string());
        self.write_all(&values)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut values = self.read_all()?;
        if values.remove(key).is_some() {
            self.write_all(&values)?;
        }
        Ok(())
    }
}
