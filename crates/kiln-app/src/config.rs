// SPDX-License-Identifier: CEPL-1.0
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use kiln_render::{ClearColor, Geometry, RendererDesc, TRIANGLE};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Config file to read
    #[arg(long, default_value = "kiln.toml")]
    pub config: PathBuf,
    /// Force the validation layer on
    #[arg(long, conflicts_with = "no_validation")]
    pub validation: bool,
    /// Force the validation layer off
    #[arg(long)]
    pub no_validation: bool,
    /// Compiled SPIR-V vertex shader
    #[arg(long)]
    pub vertex_shader: Option<PathBuf>,
    /// Compiled SPIR-V fragment shader
    #[arg(long)]
    pub fragment_shader: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: "kiln".to_owned(),
            width: 800,
            height: 600,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeometryCfg {
    Procedural {
        #[serde(default = "default_vertex_count")]
        vertex_count: u32,
    },
    Triangle,
}

impl Default for GeometryCfg {
    fn default() -> Self {
        GeometryCfg::Procedural {
            vertex_count: default_vertex_count(),
        }
    }
}

impl From<GeometryCfg> for Geometry {
    fn from(cfg: GeometryCfg) -> Self {
        match cfg {
            GeometryCfg::Procedural { vertex_count } => Geometry::Procedural { vertex_count },
            GeometryCfg::Triangle => Geometry::Vertices(TRIANGLE.to_vec()),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub validation: bool,
    pub validation_layer: String,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub geometry: GeometryCfg,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: ClearColor::BROWN.0,
            validation: cfg!(debug_assertions),
            validation_layer: kiln_render_vk::DEFAULT_VALIDATION_LAYER
                .to_string_lossy()
                .into_owned(),
            vertex_shader: PathBuf::from("shaders/vert.spv"),
            fragment_shader: PathBuf::from("shaders/frag.spv"),
            geometry: GeometryCfg::default(),
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
}

fn default_vertex_count() -> u32 {
    6
}

impl AppCfg {
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Missing file → defaults. Malformed file → warning, then defaults.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(s) => match Self::parse(&s) {
                Ok(cfg) => {
                    info!("loaded config from {}", path.display());
                    cfg
                }
                Err(e) => {
                    warn!("ignoring malformed {}: {e}", path.display());
                    AppCfg::default()
                }
            },
            Err(_) => AppCfg::default(),
        }
    }

    pub fn apply_args(&mut self, args: &Args) {
        if args.validation {
            self.render.validation = true;
        }
        if args.no_validation {
            self.render.validation = false;
        }
        if let Some(p) = &args.vertex_shader {
            self.render.vertex_shader = p.clone();
        }
        if let Some(p) = &args.fragment_shader {
            self.render.fragment_shader = p.clone();
        }
    }

    pub fn renderer_desc(&self) -> RendererDesc {
        RendererDesc {
            app_name: self.window.title.clone(),
            clear_color: ClearColor(self.render.clear_color),
            validation_layer: self
                .render
                .validation
                .then(|| self.render.validation_layer.clone()),
            vertex_shader: self.render.vertex_shader.clone(),
            fragment_shader: self.render.fragment_shader.clone(),
            geometry: self.render.geometry.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = AppCfg::parse("").unwrap();
        assert_eq!(cfg, AppCfg::default());
        assert_eq!(cfg.window.width, 800);
        assert_eq!(cfg.window.height, 600);
        assert_eq!(cfg.render.validation_layer, "VK_LAYER_KHRONOS_validation");
        assert_eq!(cfg.render.geometry, GeometryCfg::Procedural { vertex_count: 6 });
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let cfg = AppCfg::parse(
            r#"
            [window]
            title = "demo"

            [render]
            clear_color = [0.0, 0.0, 0.0, 1.0]
            geometry = { kind = "triangle" }
            "#,
        )
        .unwrap();
        assert_eq!(cfg.window.title, "demo");
        assert_eq!(cfg.window.width, 800);
        assert_eq!(cfg.render.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(cfg.render.geometry, GeometryCfg::Triangle);
        assert_eq!(cfg.render.vertex_shader, PathBuf::from("shaders/vert.spv"));
    }

    #[test]
    fn procedural_vertex_count_is_configurable() {
        let cfg = AppCfg::parse(
            r#"
            [render.geometry]
            kind = "procedural"
            vertex_count = 3
            "#,
        )
        .unwrap();
        assert_eq!(cfg.render.geometry, GeometryCfg::Procedural { vertex_count: 3 });
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(AppCfg::parse("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn missing_file_loads_defaults() {
        let cfg = AppCfg::load(Path::new("definitely/not/here/kiln.toml"));
        assert_eq!(cfg, AppCfg::default());
    }

    #[test]
    fn cli_overrides_file() {
        let mut cfg = AppCfg::default();
        cfg.render.validation = true;
        let args = Args::parse_from([
            "kiln",
            "--no-validation",
            "--vertex-shader",
            "a.spv",
            "--fragment-shader",
            "b.spv",
        ]);
        cfg.apply_args(&args);
        assert!(!cfg.render.validation);
        assert_eq!(cfg.render.vertex_shader, PathBuf::from("a.spv"));
        assert_eq!(cfg.render.fragment_shader, PathBuf::from("b.spv"));

        cfg.apply_args(&Args::parse_from(["kiln", "--validation"]));
        assert!(cfg.render.validation);
    }

    #[test]
    fn validation_flags_conflict() {
        assert!(Args::try_parse_from(["kiln", "--validation", "--no-validation"]).is_err());
    }

    #[test]
    fn desc_reflects_config() {
        let mut cfg = AppCfg::default();
        cfg.render.validation = false;
        cfg.render.geometry = GeometryCfg::Triangle;
        let desc = cfg.renderer_desc();
        assert_eq!(desc.validation_layer, None);
        assert_eq!(desc.geometry.vertex_count(), 3);
        assert_eq!(desc.clear_color, ClearColor::BROWN);

        cfg.render.validation = true;
        assert_eq!(
            cfg.renderer_desc().validation_layer.as_deref(),
            Some("VK_LAYER_KHRONOS_validation")
        );
    }
}
