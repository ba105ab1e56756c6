// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use serde_derive::Deserialize;
use serde_derive::Serialize;

use log::{error, warn};
use std::fs;
use std::path::PathBuf;

use crate::param::{DEFAULT_MAX_BODY_BYTES, DEFAULT_MAX_HEADER_BYTES};

const DEFAULT_PORT: u16 = 5000;
const PORT_SWITCHES: [&str; 2] = ["--port", "-p"];
const ENV_PORT_KEYS: [&str; 2] = ["UWEBHOST_PORT", "UWEBHOST_HOSTING__PORT"];

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_www_root")]
    www_root: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    worker_threads: usize,
    #[serde(default = "default_local")]
    local: bool,
    #[serde(default = "default_chunk_size")]
    chunk_size: usize,
    #[serde(default = "default_max_header_bytes")]
    max_header_bytes: usize,
    #[serde(default = "default_max_body_bytes")]
    max_body_bytes: usize,
}

fn default_www_root() -> String {
    "www".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_local() -> bool {
    true
}

fn default_chunk_size() -> usize {
    65536 // 64KB
}

fn default_max_header_bytes() -> usize {
    DEFAULT_MAX_HEADER_BYTES
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

fn parse_port(value: &str) -> Option<u16> {
    value.trim().parse::<u16>().ok().filter(|port| *port > 0)
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            www_root: default_www_root(),
            port: DEFAULT_PORT,
            worker_threads: 0,
            local: true,
            chunk_size: default_chunk_size(),
            max_header_bytes: default_max_header_bytes(),
            max_body_bytes: default_max_body_bytes(),
        }
    }

    /// 从 TOML 文件载入配置。文件缺失或无法解析时退回默认配置，不会中断启动。
    pub fn from_toml(filename: &str) -> Self {
        let str_val = match fs::read_to_string(filename) {
            Ok(s) => s,
            Err(e) => {
                warn!("无法读取配置文件{}：{}，使用默认配置", filename, e);
                return Self::new().normalized();
            }
        };

        let raw_config: Config = match toml::from_str(&str_val) {
            Ok(t) => t,
            Err(e) => {
                error!("无法成功从配置文件构建配置对象（{}），使用默认配置", e);
                Config::new()
            }
        };
        raw_config.normalized()
    }

    /// 以 `UWEBHOST_` 为前缀的环境变量覆盖配置文件中的端口，
    /// 接受 `UWEBHOST_PORT` 与 `UWEBHOST_HOSTING__PORT` 两种写法。
    pub fn apply_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let key = key.as_ref();
            if !ENV_PORT_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key)) {
                continue;
            }
            match parse_port(value.as_ref()) {
                Some(port) => self.port = port,
                None => warn!("忽略环境变量{}中无法识别的端口：{}", key, value.as_ref()),
            }
        }
        self
    }

    /// 命令行覆盖端口，优先级从高到低：
    /// 1. 第一个位置参数是合法端口（1-65535）
    /// 2. `--port N`、`-p N` 或 `--port=N`、`-p=N`
    pub fn apply_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            let value = match arg.split_once('=') {
                Some((switch, value)) if PORT_SWITCHES.contains(&switch) => Some(value.to_string()),
                _ if PORT_SWITCHES.contains(&arg.as_str()) => iter.next().cloned(),
                _ => continue,
            };
            match value.as_deref().and_then(parse_port) {
                Some(port) => self.port = port,
                None => warn!("忽略无法识别的端口参数：{} {}", arg, value.unwrap_or_default()),
            }
        }

        if let Some(first) = args.first() {
            if let Some(port) = parse_port(first) {
                self.port = port;
            } else if !first.starts_with('-') {
                warn!("忽略无法识别的端口参数：{}", first);
            }
        }
        self
    }

    fn normalized(mut self) -> Self {
        if self.worker_threads == 0 {
            self.worker_threads = num_cpus::get();
        }
        if self.port == 0 {
            warn!("配置的端口0不在合法范围（1-65535）内，使用默认端口{}", DEFAULT_PORT);
            self.port = DEFAULT_PORT;
        }
        if self.chunk_size == 0 {
            warn!("chunk_size被设置为0，该值将被改为{}。", default_chunk_size());
            self.chunk_size = default_chunk_size();
        }
        self
    }

    pub fn set_www_root(&mut self, root: impl Into<String>) {
        self.www_root = root.into();
    }

    pub fn set_max_body_bytes(&mut self, limit: usize) {
        self.max_body_bytes = limit;
    }
}

impl Config {
    pub fn www_root(&self) -> &str {
        &self.www_root
    }

    pub fn www_root_path(&self) -> PathBuf {
        PathBuf::from(&self.www_root)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn max_header_bytes(&self) -> usize {
        self.max_header_bytes
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.port(), 5000);
        assert_eq!(config.www_root(), "www");
        assert_eq!(config.max_header_bytes(), 32 * 1024);
        assert_eq!(config.max_body_bytes(), 8 * 1024 * 1024);
        assert!(config.local());
    }

    #[test]
    fn test_from_toml_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "www_root = \"sites\"\nport = 8080\nlocal = false").unwrap();

        let config = Config::from_toml(file.path().to_str().unwrap());
        assert_eq!(config.www_root(), "sites");
        assert_eq!(config.port(), 8080);
        assert!(!config.local());
        assert_eq!(config.chunk_size(), 65536);
        assert!(config.worker_threads() > 0);
    }

    #[test]
    fn test_from_toml_missing_file_uses_defaults() {
        let config = Config::from_toml("definitely/not/here.toml");
        assert_eq!(config.port(), 5000);
    }

    #[test]
    fn test_from_toml_port_zero_falls_back() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 0").unwrap();
        let config = Config::from_toml(file.path().to_str().unwrap());
        assert_eq!(config.port(), 5000);
    }

    #[test]
    fn test_apply_args_port_override() {
        let config = Config::new().apply_args(["9090"]);
        assert_eq!(config.port(), 9090);

        let config = Config::new().apply_args(["70000"]);
        assert_eq!(config.port(), 5000);

        let config = Config::new().apply_args(Vec::<String>::new());
        assert_eq!(config.port(), 5000);
    }

    #[test]
    fn test_apply_args_port_switches() {
        assert_eq!(Config::new().apply_args(["-p", "8080"]).port(), 8080);
        assert_eq!(Config::new().apply_args(["--port", "8081"]).port(), 8081);
        assert_eq!(Config::new().apply_args(["--port=8082"]).port(), 8082);

        // 缺失或非法的取值保留原端口
        assert_eq!(Config::new().apply_args(["-p"]).port(), 5000);
        assert_eq!(Config::new().apply_args(["--port", "0"]).port(), 5000);

        // 位置参数优先于开关
        assert_eq!(Config::new().apply_args(["9000", "-p", "8080"]).port(), 9000);
    }

    #[test]
    fn test_apply_env_port_override() {
        let config = Config::new().apply_env([("PATH", "/usr/bin"), ("UWEBHOST_PORT", "7070")]);
        assert_eq!(config.port(), 7070);

        let config = Config::new().apply_env([("UWEBHOST_HOSTING__PORT", "7071")]);
        assert_eq!(config.port(), 7071);

        let config = Config::new().apply_env([("UWEBHOST_PORT", "not-a-port")]);
        assert_eq!(config.port(), 5000);
    }

    /// 配置文件 < 环境变量 < 命令行
    #[test]
    fn test_port_override_priority() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 6000").unwrap();
        let from_file = || Config::from_toml(file.path().to_str().unwrap());

        assert_eq!(from_file().apply_env([("UWEBHOST_PORT", "7000")]).port(), 7000);
        let config = from_file()
            .apply_env([("UWEBHOST_PORT", "7000")])
            .apply_args(["--port", "8000"]);
        assert_eq!(config.port(), 8000);
        let config = from_file()
            .apply_env(Vec::<(String, String)>::new())
            .apply_args(Vec::<String>::new());
        assert_eq!(config.port(), 6000);
    }
}
