use thiserror::Error;

#[derive(Error, Debug)]
pub enum BacklogError {
    #[error("could not list backlog directory `{path}`: {source}")]
    List {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not read backlog generation `{path}`: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse backlog generation `{path}`: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not write backlog generation `{path}`: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
