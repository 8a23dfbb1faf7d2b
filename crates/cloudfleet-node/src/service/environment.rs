// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-environment configuration files and the JVM command line.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tokio::fs as async_fs;
use tracing::debug;
use zip::ZipArchive;

use crate::config::NodeConfig;
use crate::model::{ProcessConfiguration, ServiceEnvironmentType};

const BUNGEE_CONFIG: &str = include_str!("../../resources/defaults/bungee/config.yml");
const VELOCITY_CONFIG: &str = include_str!("../../resources/defaults/velocity/velocity.toml");
const PROXPROX_CONFIG: &str = include_str!("../../resources/defaults/proxprox/config.yml");
const NMS_PROPERTIES: &str = include_str!("../../resources/defaults/nms/server.properties");
const NUKKIT_PROPERTIES: &str = include_str!("../../resources/defaults/nukkit/server.properties");
const GOMINT_CONFIG: &str = include_str!("../../resources/defaults/gomint/server.yml");
const GLOWSTONE_CONFIG: &str = include_str!("../../resources/defaults/glowstone/glowstone.yml");

const DEFAULT_JVM_FLAGS: &[&str] = &[
    "-XX:+UseG1GC",
    "-XX:MaxGCPauseMillis=50",
    "-XX:-UseAdaptiveSizePolicy",
    "-XX:CompileThreshold=100",
    "-XX:+UnlockExperimentalVMOptions",
    "-XX:+UseCompressedOops",
];

const SYSTEM_PROPERTIES: &[&str] = &[
    "-Dcom.mojang.eula.agree=true",
    "-Djline.terminal=jline.UnsupportedTerminal",
    "-Dfile.encoding=UTF-8",
    "-Dio.netty.noPreferDirect=true",
    "-Dclient.encoding.override=UTF-8",
    "-Dio.netty.maxDirectMemory=0",
    "-Dio.netty.leakDetectionLevel=DISABLED",
    "-Dio.netty.recycler.maxCapacity=0",
    "-Dio.netty.recycler.maxCapacity.default=0",
    "-DIReallyKnowWhatIAmDoingISwear=true",
];

#[cfg(windows)]
const CLASSPATH_SEPARATOR: &str = ";";
#[cfg(not(windows))]
const CLASSPATH_SEPARATOR: &str = ":";

/// Where a service is reachable.
pub struct Binding<'a> {
    pub host: &'a str,
    pub port: u16,
    pub service_name: &'a str,
}

/// Write the environment's configuration files into `directory`.
///
/// A bundled default is copied first if the file does not exist yet; then
/// the address lines are rewritten.
pub async fn configure(
    directory: &Path,
    environment: ServiceEnvironmentType,
    binding: &Binding<'_>,
) -> io::Result<()> {
    let host = binding.host;
    let port = binding.port;

    match environment {
        ServiceEnvironmentType::Bungeecord => {
            let file = directory.join("config.yml");
            rewrite(&file, BUNGEE_CONFIG, |line| {
                line.starts_with("  host: ")
                    .then(|| format!("  host: {}:{}", host, port))
            })
            .await
        }
        ServiceEnvironmentType::Velocity => {
            let file = directory.join("velocity.toml");
            let mut replaced = false;
            rewrite(&file, VELOCITY_CONFIG, |line| {
                if !replaced && line.starts_with("bind =") {
                    replaced = true;
                    Some(format!("bind = \"{}:{}\"", host, port))
                } else {
                    None
                }
            })
            .await
        }
        ServiceEnvironmentType::ProxProx => {
            let file = directory.join("config.yml");
            rewrite(&file, PROXPROX_CONFIG, |line| {
                if line.starts_with("ip: ") {
                    Some(format!("ip: {}", host))
                } else if line.starts_with("port: ") {
                    Some(format!("port: {}", port))
                } else {
                    None
                }
            })
            .await
        }
        ServiceEnvironmentType::MinecraftServer => {
            let file = directory.join("server.properties");
            let port = port.to_string();
            edit_properties(
                &file,
                NMS_PROPERTIES,
                &[
                    ("server-name", binding.service_name),
                    ("server-port", port.as_str()),
                    ("server-ip", host),
                ],
            )
            .await?;
            edit_properties(&directory.join("eula.txt"), "", &[("eula", "true")]).await
        }
        ServiceEnvironmentType::Nukkit => {
            let file = directory.join("server.properties");
            let port = port.to_string();
            edit_properties(
                &file,
                NUKKIT_PROPERTIES,
                &[("server-port", port.as_str()), ("server-ip", host)],
            )
            .await
        }
        ServiceEnvironmentType::GoMint => {
            let file = directory.join("server.yml");
            rewrite(&file, GOMINT_CONFIG, |line| {
                if line.starts_with("  ip: ") {
                    Some(format!("  ip: {}", host))
                } else if line.starts_with("  port: ") {
                    Some(format!("  port: {}", port))
                } else {
                    None
                }
            })
            .await
        }
        ServiceEnvironmentType::Glowstone => {
            let file = directory.join("config").join("glowstone.yml");
            rewrite(&file, GLOWSTONE_CONFIG, |line| {
                if line.starts_with("    ip: ") {
                    Some(format!("    ip: '{}'", host))
                } else if line.starts_with("    port: ") {
                    Some(format!("    port: {}", port))
                } else {
                    None
                }
            })
            .await
        }
    }
}

async fn read_or_default(file: &Path, default: &str) -> io::Result<String> {
    if async_fs::try_exists(file).await? {
        return async_fs::read_to_string(file).await;
    }
    if let Some(parent) = file.parent() {
        async_fs::create_dir_all(parent).await?;
    }
    Ok(default.to_string())
}

async fn rewrite(
    file: &Path,
    default: &str,
    replace: impl FnMut(&str) -> Option<String>,
) -> io::Result<()> {
    let content = read_or_default(file, default).await?;
    debug!(file = %file.display(), "Rewriting environment file");
    async_fs::write(file, rewrite_lines(&content, replace)).await
}

async fn edit_properties(file: &Path, default: &str, values: &[(&str, &str)]) -> io::Result<()> {
    let content = read_or_default(file, default).await?;
    async_fs::write(file, set_properties(&content, values)).await
}

/// Apply `replace` to every line; `None` keeps the line as is.
pub fn rewrite_lines(content: &str, mut replace: impl FnMut(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(content.len());
    for line in content.lines() {
        match replace(line) {
            Some(new_line) => out.push_str(&new_line),
            None => out.push_str(line),
        }
        out.push('\n');
    }
    out
}

/// Set `key=value` pairs in a properties document, appending missing keys.
pub fn set_properties(content: &str, values: &[(&str, &str)]) -> String {
    let mut seen = vec![false; values.len()];
    let mut out = rewrite_lines(content, |line| {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') || trimmed.starts_with('!') {
            return None;
        }
        let key = trimmed.split(['=', ':']).next().unwrap_or("").trim();
        let index = values.iter().position(|(k, _)| *k == key)?;
        seen[index] = true;
        Some(format!("{}={}", values[index].0, values[index].1))
    });
    for ((key, value), found) in values.iter().zip(seen) {
        if !found {
            out.push_str(&format!("{}={}\n", key, value));
        }
    }
    out
}

/// Arguments after the launcher command, in launch order.
pub fn jvm_arguments(
    config: &NodeConfig,
    process: &ProcessConfiguration,
    wrapper_jar: &Path,
    main_class: &str,
) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    if config.default_jvm_options_parameters {
        args.extend(DEFAULT_JVM_FLAGS.iter().map(|s| s.to_string()));
    }
    args.extend(SYSTEM_PROPERTIES.iter().map(|s| s.to_string()));
    args.extend(process.jvm_options.iter().cloned());

    let wrapper = wrapper_jar.display().to_string();
    let classpath = if config.driver_classpath.is_empty() {
        wrapper.clone()
    } else {
        format!("{}{}{}", config.driver_classpath, CLASSPATH_SEPARATOR, wrapper)
    };
    args.push(format!("-Xmx{}M", process.max_heap_memory_size));
    args.push(format!("-javaagent:{}", wrapper));
    args.push("-cp".to_string());
    args.push(classpath);
    args.push(main_class.to_string());
    args.extend(
        process
            .environment
            .trailing_arguments()
            .iter()
            .map(|s| s.to_string()),
    );
    args
}

/// Absolute path of the wrapper jar.
pub fn absolute_wrapper_path(config: &NodeConfig) -> PathBuf {
    std::path::absolute(&config.wrapper_jar).unwrap_or_else(|_| config.wrapper_jar.clone())
}

/// `Main-Class` from the jar's manifest.
pub fn read_main_class(jar: &Path) -> Option<String> {
    let file = fs::File::open(jar).ok()?;
    let mut archive = ZipArchive::new(file).ok()?;
    let mut manifest = String::new();
    archive
        .by_name("META-INF/MANIFEST.MF")
        .ok()?
        .read_to_string(&mut manifest)
        .ok()?;
    manifest.lines().find_map(|line| {
        line.strip_prefix("Main-Class:")
            .map(|class| class.trim().to_string())
            .filter(|class| !class.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn binding() -> Binding<'static> {
        Binding {
            host: "10.0.0.5",
            port: 30000,
            service_name: "Lobby-1",
        }
    }

    #[tokio::test]
    async fn test_velocity_rewrites_first_bind_only() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("velocity.toml"),
            "bind = \"0.0.0.0:25577\"\n[extra]\nbind = \"keep\"\n",
        )
        .unwrap();

        configure(dir.path(), ServiceEnvironmentType::Velocity, &binding())
            .await
            .unwrap();

        let content = fs::read_to_string(dir.path().join("velocity.toml")).unwrap();
        assert_eq!(content, "bind = \"10.0.0.5:30000\"\n[extra]\nbind = \"keep\"\n");
    }

    #[tokio::test]
    async fn test_minecraft_server_properties_and_eula() {
        let dir = TempDir::new().unwrap();
        configure(dir.path(), ServiceEnvironmentType::MinecraftServer, &binding())
            .await
            .unwrap();

        let properties = fs::read_to_string(dir.path().join("server.properties")).unwrap();
        assert!(properties.contains("server-port=30000\n"));
        assert!(properties.contains("server-ip=10.0.0.5\n"));
        assert!(properties.contains("server-name=Lobby-1\n"));
        assert!(properties.contains("level-name=world\n"));

        let eula = fs::read_to_string(dir.path().join("eula.txt")).unwrap();
        assert_eq!(eula, "eula=true\n");
    }

    #[tokio::test]
    async fn test_glowstone_file_in_config_dir() {
        let dir = TempDir::new().unwrap();
        configure(dir.path(), ServiceEnvironmentType::Glowstone, &binding())
            .await
            .unwrap();

        let content = fs::read_to_string(dir.path().join("config/glowstone.yml")).unwrap();
        assert!(content.contains("    ip: '10.0.0.5'\n"));
        assert!(content.contains("    port: 30000\n"));
    }

    #[tokio::test]
    async fn test_bungee_host_line() {
        let dir = TempDir::new().unwrap();
        configure(dir.path(), ServiceEnvironmentType::Bungeecord, &binding())
            .await
            .unwrap();
        let content = fs::read_to_string(dir.path().join("config.yml")).unwrap();
        assert!(content.contains("  host: 10.0.0.5:30000\n"));
        assert!(!content.contains("0.0.0.0:25577"));
    }

    #[test]
    fn test_set_properties_appends_missing() {
        let out = set_properties("# header\na=1\nb = 2\n", &[("b", "3"), ("c", "4")]);
        assert_eq!(out, "# header\na=1\nb=3\nc=4\n");
    }

    #[test]
    fn test_jvm_arguments_order() {
        let config = NodeConfig {
            driver_classpath: "libs/driver.jar".into(),
            ..NodeConfig::default()
        };
        let process = ProcessConfiguration {
            environment: ServiceEnvironmentType::Nukkit,
            max_heap_memory_size: 256,
            jvm_options: vec!["-Dcustom=1".into()],
        };

        let args = jvm_arguments(&config, &process, Path::new("/opt/wrapper.jar"), "cloudfleet.wrapper.Main");
        assert_eq!(args[0], "-XX:+UseG1GC");
        let custom = args.iter().position(|a| a == "-Dcustom=1").unwrap();
        assert_eq!(args[custom - 1], "-DIReallyKnowWhatIAmDoingISwear=true");
        assert_eq!(
            &args[custom + 1..],
            &[
                "-Xmx256M".to_string(),
                "-javaagent:/opt/wrapper.jar".to_string(),
                "-cp".to_string(),
                format!("libs/driver.jar{}/opt/wrapper.jar", CLASSPATH_SEPARATOR),
                "cloudfleet.wrapper.Main".to_string(),
                "disable-ansi".to_string(),
            ]
        );
    }

    #[test]
    fn test_jvm_arguments_without_default_flags() {
        let config = NodeConfig {
            default_jvm_options_parameters: false,
            ..NodeConfig::default()
        };
        let process = ProcessConfiguration {
            environment: ServiceEnvironmentType::Velocity,
            max_heap_memory_size: 128,
            jvm_options: vec![],
        };
        let args = jvm_arguments(&config, &process, Path::new("/w.jar"), "Main");
        assert_eq!(args[0], "-Dcom.mojang.eula.agree=true");
        assert_eq!(args.last().unwrap(), "Main");
    }

    #[test]
    fn test_read_main_class_from_manifest() {
        let dir = TempDir::new().unwrap();
        let jar = dir.path().join("wrapper.jar");
        {
            let mut zip = zip::ZipWriter::new(fs::File::create(&jar).unwrap());
            zip.start_file("META-INF/MANIFEST.MF", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"Manifest-Version: 1.0\r\nMain-Class: org.example.Wrapper\r\n")
                .unwrap();
            zip.finish().unwrap();
        }
        assert_eq!(read_main_class(&jar).as_deref(), Some("org.example.Wrapper"));
        assert_eq!(read_main_class(&dir.path().join("missing.jar")), None);
    }
}
