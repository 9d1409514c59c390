use crate::compiler::compiler_errors::{
    CompileError, CompilerMessages, ErrorMetaDataKey, error_type_to_str,
};
use saying::say;

pub fn print_compiler_messages(messages: &CompilerMessages) {
    for error in &messages.errors {
        print_formatted_error(error);
    }
    for warning in &messages.warnings {
        say!(Yellow "warning: {}", warning);
    }
}

pub fn print_formatted_error(e: &CompileError) {
    let path = e.location.scope.display().to_string();
    let location = if path.is_empty() {
        String::new()
    } else if e.location.line > 0 {
        format!("{path}:{}:{}: ", e.location.line, e.location.column)
    } else {
        format!("{path}: ")
    };
    let excerpt = if e.location.excerpt.is_empty() {
        String::new()
    } else {
        format!(" (`{}`)", e.location.excerpt)
    };

    say!(Red "{}{}: {}{}", location, error_type_to_str(&e.error_type), e.msg, excerpt);

    if let Some(suggestion) = e.metadata.get(&ErrorMetaDataKey::PrimarySuggestion) {
        say!(Yellow "  hint: {}", suggestion);
    }
}
