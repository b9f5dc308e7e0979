mod github;
mod nexus;
mod services;
mod utils;
