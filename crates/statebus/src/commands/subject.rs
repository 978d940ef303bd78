//! `statebus subject`: filter expression to bus subject.

use statebus_api::subject::filter_expression_to_subject;

use crate::cli::SubjectArgs;
use crate::error::CliError;
use crate::output;

pub fn handle(args: &SubjectArgs) -> Result<(), CliError> {
    let subject = filter_expression_to_subject(&args.expression)?;
    output::print_output(&subject);
    Ok(())
}
