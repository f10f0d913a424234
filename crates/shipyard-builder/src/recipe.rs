//! Multi-stage image recipes.
//!
//! Stage one installs dependencies and runs the build script inside a pinned
//! runtime image; stage two copies only the declared output directory into a
//! minimal serving image.

use shipyard_config::NodeJsConfig;
use shipyard_core::Build;
use std::collections::BTreeMap;
use std::collections::HashMap;

/// Directory the serving image publishes.
pub const SERVE_ROOT: &str = "/usr/share/nginx/html";

/// A rendered-on-demand Dockerfile for the NodeJS family.
#[derive(Debug, Clone)]
pub struct NodeJsRecipe {
    runtime_image: String,
    serve_image: String,
    build_command: String,
    output_dir: String,
    environment: BTreeMap<String, String>,
}

impl NodeJsRecipe {
    pub fn new(config: &NodeJsConfig, build: &Build, environment: &HashMap<String, String>) -> Self {
        // Build-specific overlay wins over the configured defaults.
        let mut env: BTreeMap<String, String> = config
            .env_vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.extend(environment.iter().map(|(k, v)| (k.clone(), v.clone())));

        Self {
            runtime_image: format!("{}:{}-alpine", config.build_image, config.default_version),
            serve_image: config.serve_image.clone(),
            build_command: build.build_command.clone(),
            output_dir: build.output_dir.trim_matches('/').to_string(),
            environment: env,
        }
    }

    /// Build args passed alongside the recipe: the environment plus `NODE_ENV`.
    pub fn build_args(&self) -> HashMap<String, String> {
        let mut args: HashMap<String, String> = self
            .environment
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        args.insert("NODE_ENV".to_string(), "production".to_string());
        args
    }

    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str(&format!("FROM {} AS build\n\n", self.runtime_image));
        out.push_str("WORKDIR /app\n\n");
        out.push_str("RUN apk add --no-cache python3 make g++\n\n");
        out.push_str("COPY package*.json ./\n");
        out.push_str("RUN npm install\n\n");
        out.push_str("COPY . .\n\n");
        out.push_str("ENV NODE_ENV=production\n");
        out.push_str("ENV CI=true\n");
        for (key, value) in &self.environment {
            out.push_str(&format!("ENV {}={}\n", key, quote(value)));
        }
        out.push('\n');
        out.push_str(&format!("RUN npm run {}\n\n", self.build_command));

        out.push_str(&format!("FROM {}\n", self.serve_image));
        out.push_str(&format!(
            "COPY --from=build /app/{} {}\n",
            self.output_dir, SERVE_ROOT
        ));
        out.push_str("EXPOSE 80\n");

        out
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_build() -> Build {
        Build::new("b1", "web", "react")
            .with_build_command("build")
            .with_output_dir("dist/")
    }

    #[test]
    fn test_render_pins_runtime_and_copies_output() {
        let recipe = NodeJsRecipe::new(&NodeJsConfig::default(), &make_build(), &HashMap::new());
        let dockerfile = recipe.render();

        assert!(dockerfile.starts_with("FROM node:20-alpine AS build\n"));
        assert!(dockerfile.contains("RUN npm install\n"));
        assert!(dockerfile.contains("RUN npm run build\n"));
        assert!(dockerfile.contains("FROM nginx:alpine\n"));
        assert!(dockerfile.contains("COPY --from=build /app/dist /usr/share/nginx/html\n"));
    }

    #[test]
    fn test_environment_overlay_overrides_config() {
        let mut config = NodeJsConfig::default();
        config
            .env_vars
            .insert("API_URL".to_string(), "https://default".to_string());

        let mut overlay = HashMap::new();
        overlay.insert("API_URL".to_string(), "https://override".to_string());
        overlay.insert("TITLE".to_string(), "say \"hi\"".to_string());

        let dockerfile = NodeJsRecipe::new(&config, &make_build(), &overlay).render();

        assert!(dockerfile.contains("ENV API_URL=\"https://override\"\n"));
        assert!(!dockerfile.contains("https://default"));
        assert!(dockerfile.contains("ENV TITLE=\"say \\\"hi\\\"\"\n"));
    }

    #[test]
    fn test_build_args_carry_environment() {
        let mut overlay = HashMap::new();
        overlay.insert("API_URL".to_string(), "https://api".to_string());
        overlay.insert("NODE_ENV".to_string(), "development".to_string());

        let args = NodeJsRecipe::new(&NodeJsConfig::default(), &make_build(), &overlay).build_args();
        assert_eq!(args.get("API_URL").map(String::as_str), Some("https://api"));
        assert_eq!(args.get("NODE_ENV").map(String::as_str), Some("production"));
    }
}
