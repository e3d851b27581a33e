use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PortcullisError>;

#[derive(Debug, Error, Diagnostic)]
pub enum PortcullisError {
    #[error("failed to parse model configuration: {0}")]
    #[diagnostic(
        code(portcullis::config_parse),
        help("Each non-comment line must be `[section]` or `key = value`; use a trailing `\\` to continue a line")
    )]
    ConfigParse(String),

    #[error("model is missing required section `{0}`")]
    #[diagnostic(
        code(portcullis::model_incomplete),
        help("A model needs at least [request_definition], [policy_definition], [policy_effect] and [matchers]")
    )]
    ModelIncomplete(String),

    #[error("request has {actual} values but the request definition declares {expected} tokens")]
    #[diagnostic(code(portcullis::invalid_request_size))]
    InvalidRequestSize { expected: usize, actual: usize },

    #[error("policy rule for `{ptype}` has {actual} fields but the definition declares {expected} tokens")]
    #[diagnostic(code(portcullis::invalid_policy_size))]
    InvalidPolicySize {
        ptype: String,
        expected: usize,
        actual: usize,
    },

    #[error("matcher must evaluate to a boolean or a number, got {0}")]
    #[diagnostic(code(portcullis::matcher_result_type))]
    MatcherResultType(String),

    #[error("eval() argument `{0}` does not name a policy field")]
    #[diagnostic(
        code(portcullis::matcher_eval),
        help("eval(name) must reference a field declared in the policy definition, e.g. eval(p_sub_rule)")
    )]
    MatcherEval(String),

    #[error("unsupported policy effect `{0}`")]
    #[diagnostic(
        code(portcullis::unsupported_effect),
        help("Supported effects: some(where (p_eft == allow)), !some(where (p_eft == deny)), some(where (p_eft == allow)) && !some(where (p_eft == deny)), priority(p_eft) || deny, subjectPriority(p_eft) || deny")
    )]
    UnsupportedEffect(String),

    #[error("cannot save a filtered policy")]
    #[diagnostic(
        code(portcullis::filtered_save),
        help("Reload the full policy before saving, or persist mutations individually through the adapter")
    )]
    FilteredSave,

    #[error("adapter does not support filtered policy loading")]
    #[diagnostic(code(portcullis::filtered_unsupported))]
    FilteredUnsupported,

    #[error("invalid matcher expression: {0}")]
    #[diagnostic(
        code(portcullis::expression),
        help("Supported syntax: literals, ==, !=, <, <=, >, >=, &&, ||, !, in, parentheses, function calls and dotted attribute access")
    )]
    Expression(String),

    #[error("role manager error: {0}")]
    #[diagnostic(code(portcullis::rbac))]
    Rbac(String),

    #[error("policy storage error: {0}")]
    #[diagnostic(code(portcullis::policy))]
    Policy(String),

    #[error("adapter does not support `{0}`")]
    #[diagnostic(code(portcullis::adapter_unsupported))]
    AdapterUnsupported(&'static str),

    #[error("I/O error: {0}")]
    #[diagnostic(code(portcullis::io))]
    Io(#[from] std::io::Error),
}
