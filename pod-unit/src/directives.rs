use std::fmt;

const HEREDOC_MARKER: &str = "POD_UNIT_EOF";

/// Every directive the dispatcher knows how to handle.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum DirectiveKind {
    Add,
    Cmd,
    Copy,
    Entrypoint,
    Env,
    Ephemeral,
    Expose,
    Extract,
    From,
    Label,
    Maintainer,
    Onbuild,
    Run,
    User,
    Volume,
    Workdir,
}

use DirectiveKind::*;

const ALL: &[DirectiveKind] = &[
    Add, Cmd, Copy, Entrypoint, Env, Ephemeral, Expose, Extract, From, Label, Maintainer, Onbuild,
    Run, User, Volume, Workdir,
];

/// Directives that typically modify the filesystem of the working container
/// and therefore owe a commit.
const FILESYSTEM_MODIFIERS: &[DirectiveKind] = &[Add, Copy, Extract, Run];

/// Directives whose arguments are expanded against the accumulated
/// environment before the handler runs.
const ENV_REPLACEABLE: &[DirectiveKind] = &[
    Add, Copy, Env, Expose, Extract, Label, User, Volume, Workdir,
];

impl DirectiveKind {
    pub fn from_name(name: &str) -> Option<DirectiveKind> {
        let name = name.to_uppercase();
        ALL.iter().copied().find(|kind| kind.as_str() == name)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Add => "ADD",
            Cmd => "CMD",
            Copy => "COPY",
            Entrypoint => "ENTRYPOINT",
            Env => "ENV",
            Ephemeral => "EPHEMERAL",
            Expose => "EXPOSE",
            Extract => "EXTRACT",
            From => "FROM",
            Label => "LABEL",
            Maintainer => "MAINTAINER",
            Onbuild => "ONBUILD",
            Run => "RUN",
            User => "USER",
            Volume => "VOLUME",
            Workdir => "WORKDIR",
        }
    }

    pub fn modifies_filesystem(self) -> bool {
        FILESYSTEM_MODIFIERS.contains(&self)
    }

    pub fn allows_env_replacement(self) -> bool {
        ENV_REPLACEABLE.contains(&self)
    }
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed line of a build or test script: the directive name followed by
/// its arguments, plus the raw body of a heredoc if one was attached.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Directive {
    tokens: Vec<String>,
    payload: Option<String>,
    exec_form: bool,
}

impl Directive {
    pub fn new<I, S>(tokens: I) -> Directive
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Directive {
            tokens: tokens.into_iter().map(Into::into).collect(),
            payload: None,
            exec_form: false,
        }
    }

    /// A probe executed against the image under construction. Its payload is
    /// a shell command whose exit status is the verdict.
    pub fn probe<S: Into<String>>(command: S) -> Directive {
        Directive::new(vec![Ephemeral.as_str()]).with_payload(command)
    }

    pub fn with_payload<S: Into<String>>(mut self, payload: S) -> Directive {
        self.payload = Some(payload.into());
        self
    }

    /// Marks the arguments as coming from a JSON array rather than shell words.
    pub fn in_exec_form(mut self) -> Directive {
        self.exec_form = true;
        self
    }

    pub fn name(&self) -> String {
        self.tokens
            .first()
            .map(|name| name.to_uppercase())
            .unwrap_or_default()
    }

    pub fn args(&self) -> &[String] {
        self.tokens.get(1..).unwrap_or(&[])
    }

    #[cfg(test)]
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }

    pub fn is_exec_form(&self) -> bool {
        self.exec_form
    }

    pub fn kind(&self) -> Option<DirectiveKind> {
        DirectiveKind::from_name(&self.name())
    }

    pub fn is_ephemeral(&self) -> bool {
        self.kind() == Some(Ephemeral)
    }

    /// Canonical form used to match test blocks: the uppercased tokens joined
    /// by `_`.
    pub fn signature(&self) -> String {
        self.tokens.join("_").to_uppercase()
    }

    /// The shell command a RUN or EPHEMERAL directive stands for.
    pub fn shell_command(&self) -> String {
        match self.payload() {
            Some(payload) if self.args().is_empty() => payload.to_owned(),
            Some(payload) => format!(
                "{} <<'{marker}'\n{}\n{marker}",
                self.args().join(" "),
                payload,
                marker = HEREDOC_MARKER
            ),
            None => self.args().join(" "),
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&command_string(&self.name(), self.args(), self.payload()))
    }
}

/// Printable form of a directive with arguments quoted where needed. It is
/// also the unit of the build cache key, so it must be stable.
pub fn command_string(name: &str, args: &[String], payload: Option<&str>) -> String {
    let mut command = String::from(name);

    for arg in args {
        command.push(' ');
        if arg.is_empty() || arg.contains(|c| "<#'\" \x0c\n\r\t\x0b\\".contains(c)) {
            command.push_str(&format!("{:?}", arg));
        } else {
            command.push_str(arg);
        }
    }

    if let Some(payload) = payload {
        command.push_str(&format!(" <<{:?}", payload));
    }

    command
}
