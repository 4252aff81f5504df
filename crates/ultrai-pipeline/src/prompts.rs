//! Prompt templates for the peer-review and synthesis stages
//!
//! The templates take a deliberately skeptical stance: reviewers must not
//! assume any peer claim is factual, and the synthesis lead integrates
//! rather than averages. The original query is interpolated verbatim.

use ultrai_core::ModelId;

/// A labeled response carried between stages
pub struct LabeledResponse {
    /// The model that produced the text
    pub model: ModelId,
    /// The response text
    pub text: String,
}

/// Build the peer-review prompt for one reviewer
///
/// The reviewer sees its own previous answer and every peer answer,
/// labeled by model.
pub fn peer_review(query: &str, own: &LabeledResponse, peers: &[&LabeledResponse]) -> String {
    let mut prompt = String::from(
        "Critically review the following peer responses. Do not assume any claim is factual. \
         Revise your own response, adopting corrections where peers are more credible; \
         explicitly note disagreements.\n\n",
    );
    prompt.push_str(&format!("Original query: {query}\n\n"));
    prompt.push_str(&format!("Your previous response ({}):\n{}\n\n", own.model, own.text));
    prompt.push_str("Peer responses:\n");
    for peer in peers {
        prompt.push_str(&format!("\n[{} ({})]\n{}\n", peer.model, peer.model.provider, peer.text));
    }
    prompt
}

/// Build the synthesis prompt for the lead model
pub fn ultra_synthesis(query: &str, reviewed: &[LabeledResponse]) -> String {
    let mut prompt = String::from(
        "You are synthesizing responses to the user's original query. Produce a single \
         comprehensive answer integrating the strongest points across all responses, \
         resolving contradictions, and preserving nuance.\n\n",
    );
    prompt.push_str(&format!("Original query: {query}\n\n"));
    prompt.push_str("Reviewed responses:\n");
    for response in reviewed {
        prompt.push_str(&format!(
            "\n[{} ({})]\n{}\n",
            response.model, response.model.provider, response.text
        ));
    }
    prompt
}
