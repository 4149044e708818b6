use anyhow::{Context, Result};
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use taskhub_config::LogFileConfig;

/// 日志轮转配置
#[derive(Debug, Clone)]
pub struct LogRotationConfig {
    /// 日志文件路径
    pub log_file_path: PathBuf,
    /// 最大文件大小（字节）
    pub max_file_size_bytes: u64,
    /// 保留的日志文件数量，0 表示不限制
    pub max_files: usize,
    /// 旧文件最长保留时间
    pub max_age: Option<Duration>,
    /// 是否启用压缩
    pub compress_rotated_files: bool,
}

impl Default for LogRotationConfig {
    fn default() -> Self {
        Self {
            log_file_path: PathBuf::from("logs/taskhub.log"),
            max_file_size_bytes: 100 * 1024 * 1024, // 100MB
            max_files: 10,
            max_age: Some(Duration::from_secs(7 * 24 * 3600)),
            compress_rotated_files: false,
        }
    }
}

impl From<&LogFileConfig> for LogRotationConfig {
    fn from(config: &LogFileConfig) -> Self {
        Self {
            log_file_path: PathBuf::from(&config.path),
            max_file_size_bytes: config.max_size_mb.saturating_mul(1024 * 1024),
            max_files: config.max_backups,
            max_age: (config.max_age_days > 0)
                .then(|| Duration::from_secs(config.max_age_days * 24 * 3600)),
            compress_rotated_files: config.compress,
        }
    }
}

/// 按大小滚动的日志文件写入器
///
/// 写入前检查当前文件大小，超过上限时把当前文件重命名为 `<path>.<时间戳>`，
/// 可选gzip压缩，然后按数量与时间清理旧文件。
///
/// 本类型在日志管道内部使用，不能再通过 `tracing` 输出日志，失败信息写到stderr。
#[derive(Debug)]
pub struct RotatingFileWriter {
    config: LogRotationConfig,
    file: File,
    current_size: u64,
}

impl RotatingFileWriter {
    pub fn new(config: LogRotationConfig) -> Result<Self> {
        // 确保日志目录存在
        if let Some(parent) = config.log_file_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).context("创建日志目录失败")?;
            }
        }

        let file = open_log_file(&config.log_file_path)?;
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            config,
            file,
            current_size,
        })
    }

    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    /// 立即滚动当前日志文件
    pub fn rotate(&mut self) -> Result<()> {
        self.file.flush().context("轮转前刷新日志文件失败")?;

        let rotated_path = self.rotated_path();
        std::fs::rename(&self.config.log_file_path, &rotated_path)
            .context("重命名日志文件失败")?;

        self.file = open_log_file(&self.config.log_file_path)?;
        self.current_size = 0;

        if self.config.compress_rotated_files {
            if let Err(e) = compress_file(&rotated_path) {
                eprintln!("压缩日志文件 {} 失败: {e:#}", rotated_path.display());
            }
        }

        self.cleanup_old_log_files()
    }

    /// 获取日志轮转统计信息
    pub fn rotation_stats(&self) -> Result<LogRotationStats> {
        let rotated = self.rotated_files()?;
        let rotated_size: u64 = rotated
            .iter()
            .filter_map(|(path, _)| std::fs::metadata(path).ok())
            .map(|m| m.len())
            .sum();

        Ok(LogRotationStats {
            current_file_size: self.current_size,
            rotated_files_count: rotated.len(),
            total_log_size: self.current_size + rotated_size,
            max_file_size: self.config.max_file_size_bytes,
            max_files: self.config.max_files,
        })
    }

    fn rotated_path(&self) -> PathBuf {
        let base = self.config.log_file_path.display().to_string();
        let timestamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
        let mut candidate = PathBuf::from(format!("{base}.{timestamp}"));
        let mut seq = 1;
        while candidate.exists() || gz_path(&candidate).exists() {
            candidate = PathBuf::from(format!("{base}.{timestamp}-{seq}"));
            seq += 1;
        }
        candidate
    }

    /// 当前日志文件滚动出的所有旧文件，按修改时间从新到旧排列
    fn rotated_files(&self) -> Result<Vec<(PathBuf, SystemTime)>> {
        let log_dir = match self.config.log_file_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let prefix = format!(
            "{}.",
            self.config
                .log_file_path
                .file_name()
                .context("无效的日志文件路径")?
                .to_string_lossy()
        );

        let mut files = Vec::new();
        for entry in std::fs::read_dir(log_dir)? {
            let entry = entry?;
            if !entry.file_name().to_string_lossy().starts_with(&prefix) {
                continue;
            }
            if let Ok(metadata) = entry.metadata() {
                let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                files.push((entry.path(), modified));
            }
        }

        files.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(files)
    }

    /// 清理超出数量或超过保留时间的旧文件
    fn cleanup_old_log_files(&self) -> Result<()> {
        let now = SystemTime::now();

        for (index, (path, modified)) in self.rotated_files()?.into_iter().enumerate() {
            let over_count = self.config.max_files > 0 && index >= self.config.max_files;
            let expired = self.config.max_age.is_some_and(|max_age| {
                now.duration_since(modified).unwrap_or(Duration::ZERO) > max_age
            });

            if over_count || expired {
                if let Err(e) = std::fs::remove_file(&path) {
                    eprintln!("删除旧日志文件 {} 失败: {e}", path.display());
                }
            }
        }

        Ok(())
    }
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.current_size > 0
            && self.current_size + buf.len() as u64 > self.config.max_file_size_bytes
        {
            if let Err(e) = self.rotate() {
                eprintln!("日志轮转失败: {e:#}");
            }
        }

        let written = self.file.write(buf)?;
        self.current_size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// 日志轮转统计信息
#[derive(Debug, Clone)]
pub struct LogRotationStats {
    pub current_file_size: u64,
    pub rotated_files_count: usize,
    pub total_log_size: u64,
    pub max_file_size: u64,
    pub max_files: usize,
}

fn open_log_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("打开日志文件失败: {}", path.display()))
}

fn gz_path(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.gz", path.display()))
}

/// 压缩文件并删除原始文件
fn compress_file(file_path: &Path) -> Result<PathBuf> {
    let input_file = File::open(file_path).context("打开待压缩文件失败")?;

    let compressed_path = gz_path(file_path);
    let output_file = File::create(&compressed_path).context("创建压缩文件失败")?;

    let mut encoder = flate2::write::GzEncoder::new(output_file, flate2::Compression::default());
    let mut input_reader = BufReader::new(input_file);
    io::copy(&mut input_reader, &mut encoder).context("压缩文件失败")?;
    encoder.finish().context("完成压缩失败")?;

    std::fs::remove_file(file_path).context("删除已压缩的原始文件失败")?;
    Ok(compressed_path)
}
